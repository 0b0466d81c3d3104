use std::path::PathBuf;
use thiserror::Error;

use crate::model::JobStatus;

#[derive(Error, Debug)]
pub enum SeqwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid interval '{name}': {reason}")]
    InvalidInterval { name: String, reason: String },

    #[error("Invalid API URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Transport-level failures talking to the workflow backend.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("Failed to read upload file '{path}': {source}")]
    ReadUpload {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    /// Returns true for failures that a later poll may not hit again.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Request { source, .. } => source.is_timeout() || source.is_connect(),
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Server is not healthy: {0}")]
    Unhealthy(String),

    #[error("Failed to open event stream: {0}")]
    Connect(#[from] ApiError),

    #[error("Event stream read failed: {0}")]
    Read(String),

    #[error("Event stream closed by server")]
    Closed,

    #[error("Gave up after {attempts} connection attempts")]
    Exhausted { attempts: u32 },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Analysis {id} is already terminal ({from}), cannot move to {to}")]
    AlreadyTerminal {
        id: i64,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Analysis {id} cannot move back from {from} to {to}")]
    Regression {
        id: i64,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Upload {upload_id} already has a {tool} analysis")]
    DuplicateAnalysis { upload_id: i64, tool: String },

    #[error("Unknown upload {0}")]
    UnknownUpload(i64),
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Refusing to write unsafe filename '{0}'")]
    UnsafeFilename(String),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to bridge log records: {0}")]
    Bridge(#[from] log::SetLoggerError),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub type Result<T> = std::result::Result<T, SeqwatchError>;
