//! Alignment job records as delivered by the listing endpoint and the
//! push stream.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::timestamp;

/// Task identifier the server uses for keep-alive frames on the push stream.
pub const KEEP_ALIVE_TASK_ID: &str = "KEEP_ALIVE";

/// Alignment tool a job runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignTool {
    Mafft,
    Uclust,
    Vsearch,
}

impl AlignTool {
    pub const ALL: [AlignTool; 3] = [AlignTool::Mafft, AlignTool::Uclust, AlignTool::Vsearch];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlignTool::Mafft => "mafft",
            AlignTool::Uclust => "uclust",
            AlignTool::Vsearch => "vsearch",
        }
    }
}

impl std::fmt::Display for AlignTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlignTool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mafft" => Ok(AlignTool::Mafft),
            "uclust" => Ok(AlignTool::Uclust),
            "vsearch" => Ok(AlignTool::Vsearch),
            other => Err(format!(
                "unknown alignment tool '{}' (expected mafft, uclust or vsearch)",
                other
            )),
        }
    }
}

/// Status of a job or analysis.
///
/// Decodes the spellings used by both backends (`STARTED`, `FAILURE`,
/// `COMPLETED`, ...). Unknown values decode as `Pending` with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Error,
}

/// Coarse classification used by polling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Accepted but not started.
    Queued,
    /// Actively executing.
    Active,
    /// Success or error; no further transitions.
    Terminal,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Error => "ERROR",
        }
    }

    pub fn class(&self) -> StatusClass {
        match self {
            JobStatus::Pending => StatusClass::Queued,
            JobStatus::Running => StatusClass::Active,
            JobStatus::Success | JobStatus::Error => StatusClass::Terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.class() == StatusClass::Terminal
    }

    /// Ordering rank along the lifecycle; terminal states share the top rank.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Success | JobStatus::Error => 2,
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "QUEUED" => JobStatus::Pending,
            "RUNNING" | "STARTED" | "PROGRESS" => JobStatus::Running,
            "SUCCESS" | "COMPLETED" => JobStatus::Success,
            "ERROR" | "FAILURE" | "FAILED" => JobStatus::Error,
            other => {
                log::warn!("Unknown job status '{}', treating as PENDING", other);
                JobStatus::Pending
            }
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything whose polling relevance is decided by a status.
pub trait StatusSource {
    fn current_status(&self) -> JobStatus;
}

impl StatusSource for JobStatus {
    fn current_status(&self) -> JobStatus {
        *self
    }
}

/// Key that identifies one observation of a job for de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub task_id: String,
    pub status: JobStatus,
    pub updated_at: NaiveDateTime,
}

/// One alignment run as seen by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignJob {
    /// Opaque, immutable task identifier.
    pub task_id: String,
    /// Owning user.
    #[serde(rename = "userID", default)]
    pub user_id: Option<i64>,
    /// Input file path as recorded by the server.
    #[serde(default)]
    pub input_path: Option<String>,
    #[serde(default)]
    pub input_file_record_id: Option<i64>,
    /// Null only on keep-alive frames.
    #[serde(default)]
    pub align_tool: Option<AlignTool>,
    /// Raw tool option string.
    #[serde(default)]
    pub options: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: NaiveDateTime,
    #[serde(with = "timestamp")]
    pub updated_at: NaiveDateTime,
    /// File record of the alignment output (set on success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_record_id: Option<i64>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Server message; carries the error text on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AlignJob {
    /// Creates a pending job with the same creation and update time.
    pub fn new(task_id: &str, tool: AlignTool, created_at: NaiveDateTime) -> Self {
        Self {
            task_id: task_id.to_string(),
            user_id: None,
            input_path: None,
            input_file_record_id: None,
            align_tool: Some(tool),
            options: None,
            created_at,
            updated_at: created_at,
            output_file_record_id: None,
            status: JobStatus::Pending,
            progress: None,
            message: None,
        }
    }

    pub fn is_keep_alive(&self) -> bool {
        self.task_id == KEEP_ALIVE_TASK_ID
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            task_id: self.task_id.clone(),
            status: self.status,
            updated_at: self.updated_at,
        }
    }

    /// Returns true if `self` must not be replaced by `incoming`.
    ///
    /// An observation with an earlier `updatedAt` never wins. At the same
    /// `updatedAt` it loses only if it would move the job backwards along
    /// its lifecycle (for example PENDING over SUCCESS).
    pub fn supersedes(&self, incoming: &AlignJob) -> bool {
        if incoming.updated_at != self.updated_at {
            return incoming.updated_at < self.updated_at;
        }
        incoming.status.rank() < self.status.rank()
    }
}

impl StatusSource for AlignJob {
    fn current_status(&self) -> JobStatus {
        self.status
    }
}
