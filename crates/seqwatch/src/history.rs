//! Upload/analysis history with lifecycle enforcement.
//!
//! The history list is pulled from the backend and refreshed while any
//! analysis is unfinished. Status updates from followed tasks are applied
//! locally in between, never moving an analysis backwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use chrono::NaiveDateTime;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::api::JobApi;
use crate::config::ClientConfig;
use crate::error::{ApiError, ConfigError, LifecycleError};
use crate::events::{ClientEvent, EventBus, Notification};
use crate::gating::{GateDecision, PollGate, PollIntervals};
use crate::model::{Analysis, AlignTool, JobStatus, Upload};
use crate::polling::{PollOptions, Poller};

/// Local copy of the upload history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadHistory {
    uploads: Vec<Upload>,
}

impl UploadHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> &[Upload] {
        &self.uploads
    }

    pub fn get(&self, upload_id: i64) -> Option<&Upload> {
        self.uploads.iter().find(|u| u.id == upload_id)
    }

    /// All analyses across uploads.
    pub fn analyses(&self) -> impl Iterator<Item = &Analysis> {
        self.uploads.iter().flat_map(|u| u.analyses.iter())
    }

    /// Takes a fresh server listing.
    ///
    /// A held analysis is kept if the listing would move it backwards or
    /// out of the terminal status it already reached, and a locally started analysis the listing does not know
    /// yet is carried over. Returns true if anything changed.
    pub fn merge(&mut self, mut incoming: Vec<Upload>) -> bool {
        for upload in &mut incoming {
            let Some(held_upload) = self.get(upload.id) else {
                continue;
            };
            for analysis in &mut upload.analyses {
                let held = held_upload
                    .analyses
                    .iter()
                    .find(|a| a.id == analysis.id || same_task(a, analysis));
                if let Some(held) = held {
                    if supersedes(held, analysis) {
                        log::debug!(
                            "Keeping {} {} analysis {} over listed {}",
                            held.status,
                            held.method,
                            held.id,
                            analysis.status
                        );
                        let listed_id = analysis.id;
                        *analysis = held.clone();
                        if analysis.id == 0 {
                            analysis.id = listed_id;
                        }
                    }
                }
            }
            for local in held_upload.analyses.iter().filter(|a| a.id == 0) {
                if upload.analysis_for(local.method).is_none() {
                    upload.analyses.push(local.clone());
                }
            }
        }
        if incoming == self.uploads {
            return false;
        }
        self.uploads = incoming;
        true
    }

    /// Records a freshly started analysis until the listing catches up.
    /// Already listed tasks are left alone.
    pub fn record_started(
        &mut self,
        upload_id: i64,
        tool: AlignTool,
        task_id: &str,
        at: NaiveDateTime,
    ) -> Result<(), LifecycleError> {
        let upload = self
            .uploads
            .iter_mut()
            .find(|u| u.id == upload_id)
            .ok_or(LifecycleError::UnknownUpload(upload_id))?;
        if upload.analysis_for_task_mut(task_id).is_some() {
            return Ok(());
        }
        upload.attach(Analysis::started(0, tool, task_id, at))
    }

    /// Applies a status update for the analysis running as `task_id`.
    ///
    /// Returns `Ok(false)` if no analysis carries that task id.
    pub fn apply_task_update(
        &mut self,
        task_id: &str,
        status: JobStatus,
        result_file: Option<&str>,
        error: Option<&str>,
        at: NaiveDateTime,
    ) -> Result<bool, LifecycleError> {
        let Some(analysis) = self
            .uploads
            .iter_mut()
            .find_map(|u| u.analysis_for_task_mut(task_id))
        else {
            return Ok(false);
        };

        if analysis.status == status {
            return Ok(false);
        }
        match status {
            JobStatus::Success => analysis.complete(result_file.unwrap_or_default(), at)?,
            JobStatus::Error => analysis.fail(error.unwrap_or("unknown error"), at)?,
            other => analysis.transition(other, at)?,
        }
        Ok(true)
    }
}

/// True if `held` must not be replaced by `listed`: a terminal status is
/// never left, and a status never steps back along the lifecycle.
fn supersedes(held: &Analysis, listed: &Analysis) -> bool {
    if held.is_terminal() {
        return listed.status != held.status;
    }
    listed.status.rank() < held.status.rank()
}

fn same_task(a: &Analysis, b: &Analysis) -> bool {
    matches!((a.task_id(), b.task_id()), (Some(x), Some(y)) if x == y)
}

struct HistoryInner {
    api: Arc<dyn JobApi>,
    bus: EventBus,
    history: Mutex<UploadHistory>,
    gate: Mutex<PollGate>,
    alive: AtomicBool,
    poller: OnceLock<Poller>,
}

impl HistoryInner {
    fn lock_history(&self) -> MutexGuard<'_, UploadHistory> {
        self.history.lock().unwrap_or_else(|poisoned| {
            log::warn!("History lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    async fn refresh(&self) -> Result<bool, ApiError> {
        let uploads = self.api.list_uploads().await?;
        if !self.alive.load(Ordering::Acquire) {
            return Ok(false);
        }
        let changed = self.lock_history().merge(uploads);
        self.regate();
        Ok(changed)
    }

    fn regate(&self) {
        let statuses: Vec<JobStatus> = self
            .lock_history()
            .analyses()
            .map(|a| a.status)
            .collect();
        let decision = self
            .gate
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .evaluate(&statuses);
        self.apply_decision(decision);
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
            poller.run_now();
        }
    }

    fn on_event(&self, event: &ClientEvent) {
        match event {
            ClientEvent::TaskUpdated {
                task_id,
                status,
                result_file,
                error,
                ..
            } => {
                let now = chrono::Utc::now().naive_utc();
                let applied = self.lock_history().apply_task_update(
                    task_id,
                    *status,
                    result_file.as_deref(),
                    error.as_deref(),
                    now,
                );
                match applied {
                    Ok(true) => self.regate(),
                    Ok(false) => {}
                    Err(e) => log::warn!("Rejected update for task {}: {}", task_id, e),
                }
            }
            _ => {}
        }
    }
}

/// Keeps an [`UploadHistory`] current.
pub struct HistoryTracker {
    inner: Arc<HistoryInner>,
    listener: JoinHandle<()>,
}

impl HistoryTracker {
    /// Starts the tracker and loads the history once.
    pub async fn start(
        api: Arc<dyn JobApi>,
        config: &ClientConfig,
        bus: EventBus,
    ) -> Result<Self, ConfigError> {
        let intervals = PollIntervals::from(&config.polling);
        let inner = Arc::new(HistoryInner {
            api,
            bus: bus.clone(),
            history: Mutex::new(UploadHistory::new()),
            gate: Mutex::new(PollGate::new(intervals)),
            alive: AtomicBool::new(true),
            poller: OnceLock::new(),
        });

        let weak: Weak<HistoryInner> = Arc::downgrade(&inner);
        let error_bus = bus.clone();
        let poller = Poller::spawn(
            intervals.slow,
            move || {
                let weak = Weak::clone(&weak);
                async move {
                    match weak.upgrade() {
                        Some(inner) => inner.refresh().await,
                        None => Ok(false),
                    }
                }
            },
            PollOptions::new()
                .enabled(false)
                .policy(config.polling.tick_policy)
                .on_error(move |e: ApiError| {
                    log::warn!("History refresh failed: {}", e);
                    error_bus.notify(Notification::warning(
                        "History refresh failed",
                        &e.to_string(),
                    ));
                }),
        )?;
        let _ = inner.poller.set(poller);

        let listener = {
            let weak = Arc::downgrade(&inner);
            let mut rx = bus.subscribe();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            let Some(inner) = weak.upgrade() else {
                                break;
                            };
                            if let ClientEvent::DataChanged { reason } = &event {
                                log::debug!("Data changed ({}), reloading history", reason);
                                if let Err(e) = inner.refresh().await {
                                    log::warn!("History reload failed: {}", e);
                                }
                            } else {
                                inner.on_event(&event);
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            log::warn!("History listener lagged, skipped {} events", n);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        };

        let tracker = Self { inner, listener };
        if let Err(e) = tracker.refresh().await {
            log::warn!("Initial history load failed: {}", e);
            bus.notify(Notification::warning("Could not load history", &e.to_string()));
        }
        Ok(tracker)
    }

    pub async fn refresh(&self) -> Result<bool, ApiError> {
        self.inner.refresh().await
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.inner.lock_history().uploads().to_vec()
    }

    /// Starts `tool` on an upload and records the pending analysis.
    /// Returns the task id.
    pub async fn start_analysis(&self, tool: AlignTool, upload_id: i64) -> Result<String, ApiError> {
        let submitted = self.inner.api.start_analysis(tool, upload_id).await?;
        let now = chrono::Utc::now().naive_utc();
        let recorded = self
            .inner
            .lock_history()
            .record_started(upload_id, tool, &submitted.task_id, now);
        match recorded {
            Ok(()) => self.inner.regate(),
            Err(e) => log::warn!("Started task {} not recorded locally: {}", submitted.task_id, e),
        }
        self.inner.bus.data_changed("analysis started");
        Ok(submitted.task_id)
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .poller
            .get()
            .map(Poller::is_enabled)
            .unwrap_or(false)
    }

    pub fn shutdown(&self) {
        self.inner.alive.store(false, Ordering::Release);
        if let Some(poller) = self.inner.poller.get() {
            poller.shutdown();
        }
        self.listener.abort();
    }
}

impl Drop for HistoryTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
