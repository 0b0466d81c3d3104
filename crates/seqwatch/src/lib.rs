pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod gating;
pub mod health;
pub mod history;
pub mod logging;
pub mod model;
pub mod polling;
pub mod reconcile;
pub mod sanitize;
pub mod stream;
pub mod sync;
pub mod tracker;

pub use api::{HttpJobApi, JobApi};
pub use config::{load_config, load_config_or_default, ClientConfig};
pub use download::{download_file, download_result, DownloadTarget};
pub use error::{
    ApiError, ConfigError, DownloadError, LifecycleError, LoggingError, Result, SeqwatchError,
    StreamError,
};
pub use events::{ClientEvent, EventBus, Notification, NotificationLevel};
pub use gating::{GateDecision, PollGate, PollIntervals, Tier};
pub use health::{check_health, HealthMonitor};
pub use history::{HistoryTracker, UploadHistory};
pub use logging::init_logging;
pub use model::{AlignJob, AlignTool, Analysis, JobStatus, Upload};
pub use polling::{PollOptions, Poller, TickPolicy};
pub use reconcile::{MergeOutcome, PageWindow};
pub use stream::{ConnectionState, JobStream, ReconnectPolicy};
pub use sync::{BoardSnapshot, JobBoard};
pub use tracker::{TaskTracker, TrackedTask};
