//! Domain and wire types for alignment jobs, uploads and analyses.

pub mod analysis;
pub mod job;
pub mod responses;
pub mod timestamp;

pub use analysis::{Analysis, AnalysisExtra, ExecutionMetrics, Upload};
pub use job::{
    AlignJob, AlignTool, DedupKey, JobStatus, StatusClass, StatusSource, KEEP_ALIVE_TASK_ID,
};
pub use responses::{
    AlignRequest, FileRecord, FileType, HealthResponse, HealthStatus, PagedResponse,
    PaginationInfo, SubmitResponse, TaskResult, TaskStatus, UploadResponse,
};
