//! Follows individual tasks through the status endpoint until they finish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::api::JobApi;
use crate::error::{ApiError, ConfigError, SeqwatchError};
use crate::events::{ClientEvent, EventBus, Notification};
use crate::model::{AlignTool, JobStatus, TaskStatus};
use crate::polling::{PollOptions, Poller};

/// Client-side view of one followed task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedTask {
    pub task_id: String,
    pub tool: AlignTool,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl TrackedTask {
    pub fn pending(task_id: &str, tool: AlignTool) -> Self {
        Self {
            task_id: task_id.to_string(),
            tool,
            status: JobStatus::Pending,
            result_file: None,
            error: None,
            progress: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Folds a status answer in; returns true if anything changed.
    ///
    /// Answers after a terminal status, or that would step back along the
    /// lifecycle, are ignored. The tool reported by the server wins over the
    /// one the task was started with.
    pub fn apply(&mut self, answer: &TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if answer.status.rank() < self.status.rank() {
            log::debug!(
                "Ignoring {} for task {} already {}",
                answer.status,
                self.task_id,
                self.status
            );
            return false;
        }

        let before = self.clone();
        if let Some(tool) = answer.tool {
            if tool != self.tool {
                log::warn!(
                    "Task {} reports tool {} but was started as {}",
                    self.task_id,
                    tool,
                    self.tool
                );
            }
            self.tool = tool;
        }
        self.status = answer.status;
        if let Some(file) = answer.result_file() {
            self.result_file = Some(file.to_string());
        }
        if let Some(err) = answer.error_message() {
            self.error = Some(err.to_string());
        }
        if let Some(progress) = answer.progress() {
            self.progress = Some(progress);
        }
        *self != before
    }
}

struct Follow {
    state: Arc<watch::Sender<TrackedTask>>,
    poller: Poller,
}

struct TrackerInner {
    api: Arc<dyn JobApi>,
    bus: EventBus,
    interval: Duration,
    follows: Mutex<HashMap<String, Follow>>,
}

impl TrackerInner {
    fn lock_follows(&self) -> MutexGuard<'_, HashMap<String, Follow>> {
        self.follows.lock().unwrap_or_else(|poisoned| {
            log::warn!("Task tracker lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn finish(&self, task_id: &str) {
        let removed = self.lock_follows().remove(task_id);
        if removed.is_some() {
            log::debug!("Stopped following task {}", task_id);
        }
    }
}

/// Polls the status of started tasks until each reaches a terminal status.
#[derive(Clone)]
pub struct TaskTracker {
    inner: Arc<TrackerInner>,
}

impl TaskTracker {
    pub fn new(api: Arc<dyn JobApi>, bus: EventBus, interval: Duration) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                api,
                bus,
                interval,
                follows: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Starts `tool` on an upload and follows the resulting task.
    pub async fn start_analysis(
        &self,
        tool: AlignTool,
        upload_id: i64,
    ) -> Result<watch::Receiver<TrackedTask>, SeqwatchError> {
        let submitted = self.inner.api.start_analysis(tool, upload_id).await?;
        log::info!(
            "Started {} on upload {} as task {}",
            tool,
            upload_id,
            submitted.task_id
        );
        self.inner.bus.notify(Notification::info(
            "Analysis started",
            &format!("{} task {}", tool, submitted.task_id),
        ));
        self.inner.bus.data_changed("analysis started");
        Ok(self.follow(&submitted.task_id, tool)?)
    }

    /// Follows an existing task. Following the same task twice shares one
    /// poller.
    pub fn follow(
        &self,
        task_id: &str,
        tool: AlignTool,
    ) -> Result<watch::Receiver<TrackedTask>, ConfigError> {
        let mut follows = self.inner.lock_follows();
        if let Some(existing) = follows.get(task_id) {
            return Ok(existing.state.subscribe());
        }

        let (tx, rx) = watch::channel(TrackedTask::pending(task_id, tool));
        let state = Arc::new(tx);

        let api = Arc::clone(&self.inner.api);
        let id = task_id.to_string();
        let poller = Poller::spawn(
            self.inner.interval,
            move || {
                let api = Arc::clone(&api);
                let id = id.clone();
                async move { api.task_status(&id).await }
            },
            PollOptions::new()
                .enabled(false)
                .immediate(true)
                .on_success(on_status(
                    Arc::downgrade(&self.inner),
                    Arc::clone(&state),
                    self.inner.bus.clone(),
                ))
                .on_error({
                    let bus = self.inner.bus.clone();
                    let id = task_id.to_string();
                    move |e: ApiError| {
                        log::warn!("Status check for task {} failed: {}", id, e);
                        bus.notify(Notification::warning("Status check failed", &e.to_string()));
                    }
                }),
        )?;

        follows.insert(task_id.to_string(), Follow { state, poller });
        if let Some(follow) = follows.get(task_id) {
            follow.poller.set_enabled(true);
        }
        Ok(rx)
    }

    pub fn get(&self, task_id: &str) -> Option<TrackedTask> {
        self.inner
            .lock_follows()
            .get(task_id)
            .map(|f| f.state.borrow().clone())
    }

    /// Number of tasks still being followed.
    pub fn active_count(&self) -> usize {
        self.inner.lock_follows().len()
    }

    /// Stops following a task. Returns false if it was not followed.
    pub fn stop(&self, task_id: &str) -> bool {
        self.inner.lock_follows().remove(task_id).is_some()
    }
}

fn on_status(
    tracker: Weak<TrackerInner>,
    state: Arc<watch::Sender<TrackedTask>>,
    bus: EventBus,
) -> impl Fn(TaskStatus) + Send + Sync + 'static {
    move |answer: TaskStatus| {
        if !state.send_if_modified(|task| task.apply(&answer)) {
            return;
        }
        let task = state.borrow().clone();
        bus.publish(ClientEvent::TaskUpdated {
            task_id: task.task_id.clone(),
            status: task.status,
            tool: Some(task.tool),
            result_file: task.result_file.clone(),
            error: task.error.clone(),
        });

        if !task.is_terminal() {
            return;
        }
        match task.status {
            JobStatus::Success => bus.notify(Notification::success(
                "Analysis finished",
                &format!(
                    "{} task {} produced {}",
                    task.tool,
                    task.task_id,
                    task.result_file.as_deref().unwrap_or("no result file")
                ),
            )),
            _ => bus.notify(Notification::error(
                "Analysis failed",
                task.error.as_deref().unwrap_or("no error message"),
            )),
        }
        bus.data_changed("task finished");
        if let Some(tracker) = tracker.upgrade() {
            tracker.finish(&task.task_id);
        }
    }
}
