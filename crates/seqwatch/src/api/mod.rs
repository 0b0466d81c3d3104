//! Client side of the workflow backend's REST and push endpoints.

mod http;

use std::path::Path;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::ApiError;
use crate::model::{
    AlignJob, AlignRequest, AlignTool, FileRecord, HealthResponse, PagedResponse, SubmitResponse,
    TaskStatus, Upload, UploadResponse,
};

pub use http::HttpJobApi;

/// Raw chunks of the push stream body.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ApiError>>;

/// Endpoint paths relative to the API base URL.
pub mod endpoints {
    pub const HEALTH: &str = "/health";
    pub const FILE_UPLOAD: &str = "/file/upload";
    pub const FILE_LIST: &str = "/file/list";
    pub const FILE_DOWNLOAD: &str = "/file/download/{fileId}";
    pub const ALIGN_START: &str = "/align/{fileId}";
    pub const ALIGN_JOBS: &str = "/align/jobs";
    pub const ALIGN_STREAM: &str = "/align/stream";
    pub const TASK_STATUS: &str = "/status/{taskId}";
    pub const RESULT_FILE: &str = "/analysis/results/{filename}";
    pub const UPLOADS: &str = "/uploads";
    pub const ANALYSIS_START: &str = "/analysis/{tool}/{uploadId}";
}

/// Operations the client needs from the backend.
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn health(&self) -> Result<HealthResponse, ApiError>;

    async fn upload_file(&self, path: &Path) -> Result<UploadResponse, ApiError>;

    async fn list_files(&self) -> Result<Vec<FileRecord>, ApiError>;

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ApiError>;

    async fn start_alignment(
        &self,
        file_id: &str,
        request: &AlignRequest,
    ) -> Result<SubmitResponse, ApiError>;

    /// One page of jobs, newest first. `page` is 1-based.
    async fn list_jobs(&self, page: u32, size: usize) -> Result<PagedResponse<AlignJob>, ApiError>;

    /// Opens the push stream. The returned stream has no total timeout.
    async fn open_stream(&self) -> Result<ByteStream, ApiError>;

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ApiError>;

    async fn result_file(&self, filename: &str) -> Result<Vec<u8>, ApiError>;

    async fn list_uploads(&self) -> Result<Vec<Upload>, ApiError>;

    async fn start_analysis(
        &self,
        tool: AlignTool,
        upload_id: i64,
    ) -> Result<SubmitResponse, ApiError>;
}
