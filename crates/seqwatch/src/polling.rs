//! Generic repeating-fetch primitive.
//!
//! A [`Poller`] runs an async operation every `interval` while enabled.
//! Enabling (or changing the interval) starts a fresh schedule, optionally
//! running once right away; disabling or dropping the poller cancels every
//! pending tick. Operation errors go to `on_error` and never stop the
//! schedule.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::ConfigError;

/// What happens when a tick fires while the previous run is still going.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickPolicy {
    /// Skip the tick; at most one run is in flight.
    #[default]
    Serialize,
    /// Start another run regardless.
    Overlap,
}

pub type SuccessCallback<T> = Arc<dyn Fn(T) + Send + Sync>;
pub type ErrorCallback<E> = Arc<dyn Fn(E) + Send + Sync>;

type BoxedOperation<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Options for [`Poller::spawn`].
pub struct PollOptions<T, E> {
    pub enabled: bool,
    pub immediate: bool,
    pub policy: TickPolicy,
    pub on_success: Option<SuccessCallback<T>>,
    pub on_error: Option<ErrorCallback<E>>,
}

impl<T, E> Default for PollOptions<T, E> {
    fn default() -> Self {
        Self {
            enabled: true,
            immediate: false,
            policy: TickPolicy::default(),
            on_success: None,
            on_error: None,
        }
    }
}

impl<T, E> PollOptions<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn policy(mut self, policy: TickPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn on_success(mut self, callback: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(E) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Schedule {
    enabled: bool,
    interval: Duration,
}

/// Type-erased "start one run" handle shared by the schedule task and
/// [`Poller::run_now`].
trait Fire: Send + Sync {
    fn fire(&self) -> bool;
}

struct Runner<T, E> {
    operation: BoxedOperation<T, E>,
    on_success: Option<SuccessCallback<T>>,
    on_error: Option<ErrorCallback<E>>,
    policy: TickPolicy,
    in_flight: Arc<AtomicUsize>,
    runs: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
}

impl<T, E> Fire for Runner<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn fire(&self) -> bool {
        match self.policy {
            TickPolicy::Serialize => {
                if self
                    .in_flight
                    .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Poll tick skipped: previous run still in flight");
                    return false;
                }
            }
            TickPolicy::Overlap => {
                self.in_flight.fetch_add(1, Ordering::AcqRel);
            }
        }
        self.runs.fetch_add(1, Ordering::Relaxed);

        let in_flight = Arc::clone(&self.in_flight);
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| (self.operation)())) {
            Ok(future) => future,
            Err(_) => {
                log::error!("Poll operation panicked while starting; schedule continues");
                in_flight.fetch_sub(1, Ordering::AcqRel);
                return true;
            }
        };
        let on_success = self.on_success.clone();
        let on_error = self.on_error.clone();

        tokio::spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(value)) => {
                    if let Some(callback) = on_success {
                        callback(value);
                    }
                }
                Ok(Err(err)) => match on_error {
                    Some(callback) => callback(err),
                    None => log::warn!("Poll operation failed (no error handler installed)"),
                },
                Err(_) => log::error!("Poll operation panicked; schedule continues"),
            }
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });
        true
    }
}

/// Handle to a running poll schedule. Dropping it cancels the schedule.
pub struct Poller {
    control: watch::Sender<Schedule>,
    runner: Arc<dyn Fire>,
    in_flight: Arc<AtomicUsize>,
    runs: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl Poller {
    /// Starts a schedule for `operation`.
    ///
    /// Must be called inside a Tokio runtime. Fails if `interval` is zero.
    pub fn spawn<F, Fut, T, E>(
        interval: Duration,
        operation: F,
        options: PollOptions<T, E>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        validate_interval(interval)?;

        let in_flight = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicU64::new(0));
        let skipped = Arc::new(AtomicU64::new(0));
        let operation: BoxedOperation<T, E> = Arc::new(move || operation().boxed());
        let runner: Arc<dyn Fire> = Arc::new(Runner {
            operation,
            on_success: options.on_success,
            on_error: options.on_error,
            policy: options.policy,
            in_flight: Arc::clone(&in_flight),
            runs: Arc::clone(&runs),
            skipped: Arc::clone(&skipped),
        });

        let (control, control_rx) = watch::channel(Schedule {
            enabled: options.enabled,
            interval,
        });
        let task = tokio::spawn(run_schedule(
            control_rx,
            Arc::clone(&runner),
            options.immediate,
        ));

        Ok(Self {
            control,
            runner,
            in_flight,
            runs,
            skipped,
            task,
        })
    }

    /// Enables or disables the schedule. No-op if unchanged.
    pub fn set_enabled(&self, enabled: bool) {
        self.control.send_if_modified(|schedule| {
            if schedule.enabled == enabled {
                return false;
            }
            log::debug!("Polling {}", if enabled { "enabled" } else { "disabled" });
            schedule.enabled = enabled;
            true
        });
    }

    /// Changes the interval, restarting the schedule. No-op if unchanged.
    pub fn set_interval(&self, interval: Duration) -> Result<(), ConfigError> {
        validate_interval(interval)?;
        self.control.send_if_modified(|schedule| {
            if schedule.interval == interval {
                return false;
            }
            log::debug!(
                "Polling interval {:?} -> {:?}",
                schedule.interval,
                interval
            );
            schedule.interval = interval;
            true
        });
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.control.borrow().enabled
    }

    pub fn interval(&self) -> Duration {
        self.control.borrow().interval
    }

    /// Runs the operation once outside the schedule.
    ///
    /// Ignored while disabled or, under [`TickPolicy::Serialize`], while a
    /// run is in flight. Returns whether a run was started.
    pub fn run_now(&self) -> bool {
        if !self.is_enabled() || self.task.is_finished() {
            return false;
        }
        self.runner.fire()
    }

    /// Number of runs currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Total runs started so far.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Ticks dropped because a run was still in flight.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Cancels the schedule. Runs already started finish on their own.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn validate_interval(interval: Duration) -> Result<(), ConfigError> {
    if interval.is_zero() {
        return Err(ConfigError::InvalidInterval {
            name: "poll interval".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

async fn run_schedule(
    mut control: watch::Receiver<Schedule>,
    runner: Arc<dyn Fire>,
    immediate: bool,
) {
    loop {
        let schedule = *control.borrow_and_update();

        if !schedule.enabled {
            if control.changed().await.is_err() {
                return;
            }
            continue;
        }

        if immediate {
            runner.fire();
        }

        let mut ticker =
            tokio::time::interval_at(Instant::now() + schedule.interval, schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = control.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    // Old ticker is dropped here before the new schedule starts.
                    break;
                }
                _ = ticker.tick() => {
                    if control.borrow().enabled {
                        runner.fire();
                    }
                }
            }
        }
    }
}
