//! Request and response bodies exchanged with the workflow backend.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::job::{AlignTool, JobStatus};
use super::timestamp;

/// Whether a file record is an uploaded input or a produced output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileType {
    Input,
    Output,
}

/// Stored file as listed by the file service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: i64,
    pub filename: String,
    #[serde(default)]
    pub unique_filename: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: NaiveDateTime,
    #[serde(default)]
    pub file_type: Option<FileType>,
    pub size: u64,
}

/// Answer to a file upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_id: String,
    pub file_name: String,
    pub size: u64,
}

/// Body of an alignment start request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignRequest {
    pub user_id: i64,
    pub align_tool: AlignTool,
    pub options: String,
}

/// Answer to an analysis start request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default = "pending")]
    pub status: JobStatus,
    pub task_id: String,
}

fn pending() -> JobStatus {
    JobStatus::Pending
}

/// Worker-side result attached to a finished task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub result_file: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
}

/// Answer of the status endpoint for a single task.
///
/// The tool is carried explicitly so a finished result never has to be
/// attributed by looking at its filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: JobStatus,
    #[serde(default, alias = "method")]
    pub tool: Option<AlignTool>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskStatus {
    pub fn result_file(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.result_file.as_deref())
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or_else(|| self.result.as_ref().and_then(|r| r.error.as_deref()))
    }

    pub fn progress(&self) -> Option<f64> {
        self.result.as_ref().and_then(|r| r.progress)
    }
}

/// One page of a server-ordered listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResponse<T> {
    pub content: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_pages: u32,
    pub total_elements: u64,
    #[serde(default)]
    pub first: bool,
    #[serde(default)]
    pub last: bool,
    #[serde(default)]
    pub number_of_elements: u32,
}

impl<T> PagedResponse<T> {
    /// Wraps a bare list as the only page of a listing.
    pub fn single_page(content: Vec<T>, page: u32, size: u32) -> Self {
        let len = content.len();
        Self {
            content,
            page,
            size,
            total_pages: 1,
            total_elements: len as u64,
            first: true,
            last: true,
            number_of_elements: len as u32,
        }
    }
}

/// Pagination summary of the page currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_items: u64,
    pub items_per_page: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(default, with = "timestamp::option")]
    pub timestamp: Option<NaiveDateTime>,
    #[serde(default)]
    pub details: String,
}

impl HealthResponse {
    /// Synthesised answer used when the health endpoint cannot be reached.
    pub fn unreachable(reason: &str) -> Self {
        Self {
            status: HealthStatus::Down,
            timestamp: Some(chrono::Utc::now().naive_utc()),
            details: reason.to_string(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == HealthStatus::Up
    }
}
