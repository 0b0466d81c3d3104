use std::time::Duration;

use crate::config::StreamConfig;

/// Bounded, fixed-delay reconnect policy for the push stream.
///
/// Only a stream that never opened is retried: one that was open and then
/// ended is treated as an intentional server-side close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnects allowed after the first failed attempt.
    pub max_attempts: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try again after `delay`; `attempt` is the 1-based reconnect number.
    Retry { attempt: u32, delay: Duration },
    /// The stream had been open; stay disconnected.
    Stop,
    /// Never opened and out of attempts.
    GiveUp { attempts: u32 },
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Decides what to do after a connection ended or failed.
    ///
    /// `failed_attempts` counts connection attempts that failed so far,
    /// including the one that just failed.
    pub fn decide(&self, ever_opened: bool, failed_attempts: u32) -> ReconnectDecision {
        if ever_opened {
            return ReconnectDecision::Stop;
        }
        if failed_attempts <= self.max_attempts {
            return ReconnectDecision::Retry {
                attempt: failed_attempts,
                delay: self.delay,
            };
        }
        ReconnectDecision::GiveUp {
            attempts: failed_attempts,
        }
    }
}

impl From<&StreamConfig> for ReconnectPolicy {
    fn from(config: &StreamConfig) -> Self {
        Self::new(
            config.max_reconnect_attempts,
            Duration::from_millis(config.reconnect_delay_ms),
        )
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}
