//! Builders for creating test data programmatically.

#![allow(dead_code)]

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};

use seqwatch::config::ClientConfig;
use seqwatch::events::{ClientEvent, Notification};
use seqwatch::model::{
    AlignJob, AlignTool, Analysis, JobStatus, PagedResponse, TaskResult, TaskStatus, Upload,
    KEEP_ALIVE_TASK_ID,
};

/// Timestamp `minute` minutes after a fixed base time.
pub fn at(minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
        + chrono::Duration::minutes(minute as i64)
}

/// Builder for `AlignJob` records.
pub struct JobBuilder {
    job: AlignJob,
}

impl JobBuilder {
    /// A pending MAFFT job created and updated at minute 0.
    pub fn new(task_id: &str) -> Self {
        Self {
            job: AlignJob::new(task_id, AlignTool::Mafft, at(0)),
        }
    }

    pub fn tool(mut self, tool: AlignTool) -> Self {
        self.job.align_tool = Some(tool);
        self
    }

    /// Sets both creation and update time.
    pub fn created(mut self, minute: u32) -> Self {
        self.job.created_at = at(minute);
        self.job.updated_at = at(minute);
        self
    }

    pub fn updated(mut self, minute: u32) -> Self {
        self.job.updated_at = at(minute);
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    pub fn message(mut self, message: &str) -> Self {
        self.job.message = Some(message.to_string());
        self
    }

    pub fn build(self) -> AlignJob {
        self.job
    }
}

/// Shorthand for a job with a status, created at `minute`.
pub fn job(task_id: &str, status: JobStatus, minute: u32) -> AlignJob {
    JobBuilder::new(task_id).created(minute).status(status).build()
}

/// The frame the server sends to keep idle connections open.
pub fn keep_alive() -> AlignJob {
    JobBuilder::new(KEEP_ALIVE_TASK_ID)
        .message("Keep-alive signal")
        .build()
}

/// Encodes a job as one SSE frame.
pub fn sse_frame(job: &AlignJob) -> Vec<u8> {
    format!("data: {}\n\n", serde_json::to_string(job).unwrap()).into_bytes()
}

/// One page of a listing with `total` records overall.
pub fn page(content: Vec<AlignJob>, page: u32, size: u32, total: u64) -> PagedResponse<AlignJob> {
    let total_pages = ((total + size as u64 - 1) / size as u64).max(1) as u32;
    let len = content.len() as u32;
    PagedResponse {
        content,
        page,
        size,
        total_pages,
        total_elements: total,
        first: page == 1,
        last: page >= total_pages,
        number_of_elements: len,
    }
}

pub fn upload(id: i64, analyses: Vec<Analysis>) -> Upload {
    Upload {
        id,
        filename: format!("reads-{}.fasta", id),
        created_at: at(0),
        analyses,
    }
}

/// Status answer with optional result file.
pub fn task_status(status: JobStatus, result_file: Option<&str>) -> TaskStatus {
    TaskStatus {
        status,
        tool: None,
        result: result_file.map(|f| TaskResult {
            result_file: Some(f.to_string()),
            ..TaskResult::default()
        }),
        error: None,
    }
}

/// Builder for `ClientConfig` with short intervals.
pub struct ConfigBuilder {
    config: ClientConfig,
}

impl ConfigBuilder {
    /// Fast 100ms, medium 300ms, slow 1s, page size 10, two reconnects
    /// one second apart.
    pub fn new() -> Self {
        let mut config = ClientConfig::default();
        config.polling.fast_ms = 100;
        config.polling.medium_ms = 300;
        config.polling.slow_ms = 1_000;
        config.polling.task_status_ms = 100;
        config.stream.max_reconnect_attempts = 2;
        config.stream.reconnect_delay_ms = 1_000;
        config.health.interval_ms = 1_000;
        Self { config }
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    pub fn reconnect(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.config.stream.max_reconnect_attempts = attempts;
        self.config.stream.reconnect_delay_ms = delay_ms;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Lets spawned tasks run; time is paused in most tests.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Drains everything currently queued on a bus receiver.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn notifications(events: &[ClientEvent]) -> Vec<Notification> {
    events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Notification(n) => Some(n.clone()),
            _ => None,
        })
        .collect()
}
