//! Scripted in-memory backend.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use seqwatch::api::{ByteStream, JobApi};
use seqwatch::error::ApiError;
use seqwatch::model::{
    AlignJob, AlignRequest, AlignTool, FileRecord, HealthResponse, HealthStatus, JobStatus,
    PagedResponse, SubmitResponse, TaskStatus, Upload, UploadResponse,
};

use super::builders::page;

/// What the next `open_stream` call does.
pub enum StreamScript {
    /// Answer with this HTTP status.
    Refuse(u16),
    /// Deliver these chunks, then close.
    Chunks(Vec<Vec<u8>>),
    /// Deliver whatever is sent on the channel until it closes.
    Live(mpsc::UnboundedReceiver<Vec<u8>>),
}

fn unavailable(endpoint: &str) -> ApiError {
    ApiError::Status {
        endpoint: endpoint.to_string(),
        status: 503,
        body: "Service Unavailable".to_string(),
    }
}

#[derive(Default)]
pub struct FakeApi {
    jobs: Mutex<Vec<AlignJob>>,
    unhealthy: AtomicBool,
    fail_listing: AtomicBool,
    list_delay: Mutex<Option<Duration>>,
    streams: Mutex<VecDeque<StreamScript>>,
    statuses: Mutex<VecDeque<TaskStatus>>,
    last_status: Mutex<Option<TaskStatus>>,
    uploads: Mutex<Vec<Upload>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    next_task: AtomicUsize,

    pub health_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub stream_opens: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub upload_list_calls: AtomicUsize,
    pub analysis_starts: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the server-side listing, newest first.
    pub fn set_jobs(&self, jobs: Vec<AlignJob>) {
        *self.jobs.lock().unwrap() = jobs;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Makes `list_jobs` take `delay` before answering.
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    pub fn push_stream(&self, script: StreamScript) {
        self.streams.lock().unwrap().push_back(script);
    }

    /// Queues status answers; the last one keeps being returned.
    pub fn push_status(&self, status: TaskStatus) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn set_uploads(&self, uploads: Vec<Upload>) {
        *self.uploads.lock().unwrap() = uploads;
    }

    pub fn add_file(&self, name: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), content.to_vec());
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobApi for FakeApi {
    async fn health(&self) -> Result<HealthResponse, ApiError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        let status = if self.unhealthy.load(Ordering::SeqCst) {
            HealthStatus::Down
        } else {
            HealthStatus::Up
        };
        Ok(HealthResponse {
            status,
            timestamp: None,
            details: format!("{:?}", status),
        })
    }

    async fn upload_file(&self, path: &Path) -> Result<UploadResponse, ApiError> {
        Ok(UploadResponse {
            file_id: "1".to_string(),
            file_name: path.display().to_string(),
            size: 0,
        })
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>, ApiError> {
        Ok(Vec::new())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ApiError> {
        self.files
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| ApiError::Status {
                endpoint: "/file/download/{fileId}".to_string(),
                status: 404,
                body: "not found".to_string(),
            })
    }

    async fn start_alignment(
        &self,
        _file_id: &str,
        _request: &AlignRequest,
    ) -> Result<SubmitResponse, ApiError> {
        let n = self.next_task.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SubmitResponse {
            status: JobStatus::Pending,
            task_id: format!("align-{}", n),
        })
    }

    async fn list_jobs(&self, page_no: u32, size: usize) -> Result<PagedResponse<AlignJob>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        // The answer reflects the server state when the request arrived.
        let jobs = self.jobs.lock().unwrap().clone();
        let failing = self.fail_listing.load(Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(unavailable("/align/jobs"));
        }

        let total = jobs.len() as u64;
        let start = (page_no.max(1) as usize - 1) * size;
        let content: Vec<AlignJob> = jobs.into_iter().skip(start).take(size).collect();
        Ok(page(content, page_no, size as u32, total))
    }

    async fn open_stream(&self) -> Result<ByteStream, ApiError> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        let script = self.streams.lock().unwrap().pop_front();
        match script {
            None => Err(unavailable("/align/stream")),
            Some(StreamScript::Refuse(status)) => Err(ApiError::Status {
                endpoint: "/align/stream".to_string(),
                status,
                body: String::new(),
            }),
            Some(StreamScript::Chunks(chunks)) => {
                Ok(stream::iter(chunks.into_iter().map(Ok::<Vec<u8>, ApiError>)).boxed())
            }
            Some(StreamScript::Live(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv()
                    .await
                    .map(|chunk| (Ok::<Vec<u8>, ApiError>(chunk), rx))
            })
            .boxed()),
        }
    }

    async fn task_status(&self, _task_id: &str) -> Result<TaskStatus, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.statuses.lock().unwrap().pop_front();
        let mut last = self.last_status.lock().unwrap();
        if let Some(next) = next {
            *last = Some(next);
        }
        last.clone().ok_or_else(|| unavailable("/status/{taskId}"))
    }

    async fn result_file(&self, filename: &str) -> Result<Vec<u8>, ApiError> {
        self.download_file(filename).await
    }

    async fn list_uploads(&self) -> Result<Vec<Upload>, ApiError> {
        self.upload_list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.uploads.lock().unwrap().clone())
    }

    async fn start_analysis(
        &self,
        tool: AlignTool,
        _upload_id: i64,
    ) -> Result<SubmitResponse, ApiError> {
        self.analysis_starts.fetch_add(1, Ordering::SeqCst);
        let n = self.next_task.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SubmitResponse {
            status: JobStatus::Pending,
            task_id: format!("{}-{}", tool, n),
        })
    }
}
