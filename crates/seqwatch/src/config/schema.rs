use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::polling::TickPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default = "default_version")]
    pub version: String,

    /// Base URL of the workflow backend.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Rows per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// User id sent with alignment requests.
    #[serde(default = "default_user_id")]
    pub user_id: i64,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub http: HttpConfig,

    /// Where downloads land; current directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_api_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_page_size() -> usize {
    10
}

fn default_user_id() -> i64 {
    1
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            api_url: default_api_url(),
            page_size: default_page_size(),
            user_id: default_user_id(),
            polling: PollingConfig::default(),
            stream: StreamConfig::default(),
            health: HealthConfig::default(),
            http: HttpConfig::default(),
            download_dir: None,
        }
    }
}

/// Interval tiers for list polling.
///
/// `fast` is used while something is running, `medium` while work is only
/// queued and `slow` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingConfig {
    #[serde(default = "default_fast_ms")]
    pub fast_ms: u64,
    #[serde(default = "default_medium_ms")]
    pub medium_ms: u64,
    #[serde(default = "default_slow_ms")]
    pub slow_ms: u64,
    /// Cadence of the single-task status follower.
    #[serde(default = "default_task_status_ms")]
    pub task_status_ms: u64,
    #[serde(default)]
    pub tick_policy: TickPolicy,
}

fn default_fast_ms() -> u64 {
    1_000
}

fn default_medium_ms() -> u64 {
    3_000
}

fn default_slow_ms() -> u64 {
    15_000
}

fn default_task_status_ms() -> u64 {
    3_000
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            fast_ms: default_fast_ms(),
            medium_ms: default_medium_ms(),
            slow_ms: default_slow_ms(),
            task_status_ms: default_task_status_ms(),
            tick_policy: TickPolicy::default(),
        }
    }
}

impl PollingConfig {
    pub fn fast(&self) -> Duration {
        Duration::from_millis(self.fast_ms)
    }

    pub fn medium(&self) -> Duration {
        Duration::from_millis(self.medium_ms)
    }

    pub fn slow(&self) -> Duration {
        Duration::from_millis(self.slow_ms)
    }

    pub fn task_status(&self) -> Duration {
        Duration::from_millis(self.task_status_ms)
    }
}

/// Reconnect policy for the push stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    3_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,
}

fn default_health_interval_ms() -> u64 {
    30_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_health_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Applies to REST calls only; the push stream has no total timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}
