//! Keeps one listing page in sync with the backend.
//!
//! The board owns a [`PageWindow`] and a [`PollGate`] behind one mutex.
//! Push observations from the [`JobStream`] and pulled pages from the
//! [`Poller`] both go through the reconciler; after every change the gate
//! is re-evaluated and its decision applied to the poller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::api::JobApi;
use crate::config::ClientConfig;
use crate::error::{ApiError, ConfigError};
use crate::events::{ClientEvent, EventBus, Notification};
use crate::gating::{GateDecision, PollGate, PollIntervals};
use crate::model::{AlignJob, JobStatus, PaginationInfo};
use crate::polling::{PollOptions, Poller};
use crate::reconcile::{MergeOutcome, PageWindow};
use crate::stream::{ConnectionState, JobStream, ReconnectPolicy};

struct BoardState {
    window: PageWindow,
    gate: PollGate,
}

/// Read-only copy of what the board currently shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    pub jobs: Vec<AlignJob>,
    pub pagination: PaginationInfo,
    pub polling_enabled: bool,
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

struct BoardInner {
    api: Arc<dyn JobApi>,
    bus: EventBus,
    state: Mutex<BoardState>,
    alive: AtomicBool,
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_pending: AtomicBool,
    poller: OnceLock<Poller>,
}

impl BoardInner {
    fn lock_state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            log::warn!("Board state lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Pulls the current page. With `wait == false` a refresh already in
    /// flight makes this a no-op.
    ///
    /// A change reported while the lock is held is pulled again by the
    /// holder once its own fetch has been applied.
    async fn refresh(&self, wait: bool) -> Result<bool, ApiError> {
        let _guard = if wait {
            self.refresh_lock.lock().await
        } else {
            match self.refresh_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    log::debug!("Refresh skipped: another refresh is in flight");
                    return Ok(false);
                }
            }
        };

        let mut changed = false;
        loop {
            self.refresh_pending.store(false, Ordering::Release);
            changed |= self.pull_page().await?;
            if !self.is_alive() || !self.refresh_pending.load(Ordering::Acquire) {
                return Ok(changed);
            }
            log::debug!("Data changed during refresh, pulling again");
        }
    }

    /// Refresh for an explicit data-changed notice. Never lost: if another
    /// refresh is in flight it repeats its fetch afterwards.
    async fn refresh_on_change(&self) -> Result<bool, ApiError> {
        self.refresh_pending.store(true, Ordering::Release);
        self.refresh(false).await
    }

    async fn pull_page(&self) -> Result<bool, ApiError> {
        let (page, size) = {
            let state = self.lock_state();
            (state.window.page(), state.window.page_size())
        };
        let snapshot = self.api.list_jobs(page, size).await?;

        if !self.is_alive() {
            log::debug!("Discarding page {} fetched after shutdown", page);
            return Ok(false);
        }

        let (changed, len, decision) = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let changed = state.window.apply_snapshot(snapshot);
            let decision = state.gate.evaluate(state.window.jobs());
            (changed, state.window.len(), decision)
        };

        if changed {
            self.bus.publish(ClientEvent::WindowChanged { page, len });
        }
        self.apply_decision(decision);
        Ok(changed)
    }

    fn handle_push(&self, job: AlignJob) {
        if !self.is_alive() {
            return;
        }

        let (outcome, page, len, decision) = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let outcome = state.window.apply_push(job.clone());
            let decision = state.gate.evaluate(state.window.jobs());
            (outcome, state.window.page(), state.window.len(), decision)
        };

        log::debug!("Push for {}: {:?}", job.task_id, outcome);
        if outcome.changed() {
            let was_terminal = matches!(
                outcome,
                MergeOutcome::Updated { previous, .. } if previous.is_terminal()
            );
            if !was_terminal {
                notify_terminal(&self.bus, &job);
            }
            self.bus.publish(ClientEvent::JobUpdated { job });
            self.bus.publish(ClientEvent::WindowChanged { page, len });
        }
        if outcome != MergeOutcome::Duplicate {
            self.apply_decision(decision);
        }
    }

    fn apply_decision(&self, decision: GateDecision) {
        let Some(poller) = self.poller.get() else {
            return;
        };
        if let Err(e) = poller.set_interval(decision.interval) {
            log::warn!("Ignoring gate interval: {}", e);
        }
        poller.set_enabled(decision.enabled);
        if decision.resumed {
            log::debug!("Polling resumed, refreshing now");
            poller.run_now();
        }
    }
}

fn notify_terminal(bus: &EventBus, job: &AlignJob) {
    let tool = job
        .align_tool
        .map(|t| t.to_string())
        .unwrap_or_else(|| "alignment".to_string());
    match job.status {
        JobStatus::Success => bus.notify(Notification::success(
            "Alignment finished",
            &format!("{} job {} completed", tool, job.task_id),
        )),
        JobStatus::Error => bus.notify(Notification::error(
            "Alignment failed",
            job.message.as_deref().unwrap_or("no error message"),
        )),
        _ => {}
    }
}

/// Live view of one listing page.
pub struct JobBoard {
    inner: Arc<BoardInner>,
    stream: Option<JobStream>,
    listener: JoinHandle<()>,
}

impl JobBoard {
    /// Starts polling, the push stream and the data-changed listener, and
    /// loads the first page. A failed first load is reported on the bus.
    pub async fn start(
        api: Arc<dyn JobApi>,
        config: &ClientConfig,
        bus: EventBus,
    ) -> Result<Self, ConfigError> {
        let board = Self::start_with(api, config, bus, true)?;
        if let Err(e) = board.refresh().await {
            log::warn!("Initial job listing failed: {}", e);
            board
                .inner
                .bus
                .notify(Notification::warning("Could not load jobs", &e.to_string()));
        }
        Ok(board)
    }

    /// Like [`start`](Self::start) but optionally without the push stream
    /// and without the initial load. Must be called inside a Tokio runtime.
    pub fn start_with(
        api: Arc<dyn JobApi>,
        config: &ClientConfig,
        bus: EventBus,
        with_stream: bool,
    ) -> Result<Self, ConfigError> {
        let intervals = PollIntervals::from(&config.polling);
        let inner = Arc::new(BoardInner {
            api: Arc::clone(&api),
            bus: bus.clone(),
            state: Mutex::new(BoardState {
                window: PageWindow::new(config.page_size),
                gate: PollGate::new(intervals),
            }),
            alive: AtomicBool::new(true),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_pending: AtomicBool::new(false),
            poller: OnceLock::new(),
        });

        let weak = Arc::downgrade(&inner);
        let error_bus = bus.clone();
        let poller = Poller::spawn(
            intervals.slow,
            move || {
                let weak = Weak::clone(&weak);
                async move {
                    match weak.upgrade() {
                        Some(inner) => inner.refresh(false).await,
                        None => Ok(false),
                    }
                }
            },
            PollOptions::new()
                .enabled(false)
                .policy(config.polling.tick_policy)
                .on_error(move |e: ApiError| {
                    log::warn!("Job refresh failed: {}", e);
                    error_bus.notify(Notification::warning("Refresh failed", &e.to_string()));
                }),
        )?;
        let _ = inner.poller.set(poller);

        let stream = with_stream.then(|| {
            let weak = Arc::downgrade(&inner);
            JobStream::spawn(
                api,
                ReconnectPolicy::from(&config.stream),
                bus.clone(),
                Arc::new(move |job: AlignJob| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_push(job);
                    }
                }),
            )
        });

        let listener = spawn_listener(Arc::downgrade(&inner), &bus);

        Ok(Self {
            inner,
            stream,
            listener,
        })
    }

    /// Pulls the current page now, waiting for any refresh in flight.
    pub async fn refresh(&self) -> Result<bool, ApiError> {
        self.inner.refresh(true).await
    }

    /// Applies one push observation as if it came from the stream.
    pub fn apply_push(&self, job: AlignJob) {
        self.inner.handle_push(job);
    }

    /// Switches page and loads it.
    pub async fn go_to_page(&self, page: u32) -> Result<bool, ApiError> {
        let switched = self.inner.lock_state().window.go_to_page(page);
        if !switched {
            return Ok(false);
        }
        self.inner.refresh(true).await?;
        Ok(true)
    }

    /// Records whether the consuming view is visible and re-evaluates.
    pub fn set_visible(&self, visible: bool) {
        let decision = {
            let mut guard = self.inner.lock_state();
            let state = &mut *guard;
            state.gate.set_visible(visible);
            state.gate.evaluate(state.window.jobs())
        };
        self.inner.apply_decision(decision);
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        let state = self.inner.lock_state();
        let (polling_enabled, poll_interval) = match self.inner.poller.get() {
            Some(p) => (p.is_enabled(), p.interval()),
            None => (false, Duration::ZERO),
        };
        BoardSnapshot {
            jobs: state.window.jobs().to_vec(),
            pagination: state.window.pagination(),
            polling_enabled,
            poll_interval,
        }
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.stream.as_ref().map(|s| s.state())
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    /// Stops everything. Fetches that resolve later are discarded.
    pub fn shutdown(&self) {
        if !self.inner.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        log::debug!("Shutting down job board");
        if let Some(poller) = self.inner.poller.get() {
            poller.shutdown();
        }
        if let Some(stream) = &self.stream {
            stream.shutdown();
        }
        self.listener.abort();
    }
}

impl Drop for JobBoard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_listener(weak: Weak<BoardInner>, bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ClientEvent::DataChanged { reason }) => {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    if !inner.is_alive() {
                        break;
                    }
                    log::debug!("Data changed ({}), refreshing", reason);
                    if let Err(e) = inner.refresh_on_change().await {
                        log::warn!("Out-of-band refresh failed: {}", e);
                        inner
                            .bus
                            .notify(Notification::warning("Refresh failed", &e.to_string()));
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    log::warn!("Job board listener lagged, skipped {} events", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
