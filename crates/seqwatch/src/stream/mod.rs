//! Push stream of job observations.

mod reconnect;
mod sse;

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::api::JobApi;
use crate::error::StreamError;
use crate::events::{ClientEvent, EventBus, Notification};
use crate::model::AlignJob;

pub use reconnect::{ReconnectDecision, ReconnectPolicy};
pub use sse::{SseDecoder, SseEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Stream ended after having been open.
    Disconnected,
    /// Never opened; reconnect attempts exhausted.
    Error,
}

impl ConnectionState {
    pub fn is_final(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Callback receiving every non-keep-alive observation, in delivery order.
pub type JobHandler = Arc<dyn Fn(AlignJob) + Send + Sync>;

/// Handle to the background stream task. Dropping it closes the stream.
pub struct JobStream {
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl JobStream {
    pub fn spawn(
        api: Arc<dyn JobApi>,
        policy: ReconnectPolicy,
        bus: EventBus,
        handler: JobHandler,
    ) -> Self {
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        let span = tracing::info_span!("job_stream");
        let task = tokio::spawn(
            run_stream(StreamTask {
                api,
                policy,
                bus,
                handler,
                state: state_tx,
            })
            .instrument(span),
        );
        Self { state, task }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for JobStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct StreamTask {
    api: Arc<dyn JobApi>,
    policy: ReconnectPolicy,
    bus: EventBus,
    handler: JobHandler,
    state: watch::Sender<ConnectionState>,
}

impl StreamTask {
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            log::debug!("Event stream {}", next);
            self.bus
                .publish(ClientEvent::ConnectionChanged { state: next });
        }
    }

    /// Health check, connect, then read until the body ends. `Ok` means the
    /// server closed the stream cleanly.
    async fn connect_and_read(&self, ever_opened: &mut bool) -> Result<(), StreamError> {
        let health = self.api.health().await?;
        if !health.is_up() {
            return Err(StreamError::Unhealthy(health.details));
        }

        let mut body = self.api.open_stream().await?;
        *ever_opened = true;
        self.set_state(ConnectionState::Connected);
        log::info!("Event stream connected");

        let mut decoder = SseDecoder::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StreamError::Read(e.to_string()))?;
            for event in decoder.feed(&chunk) {
                match serde_json::from_str::<AlignJob>(&event.data) {
                    Ok(job) if job.is_keep_alive() => log::trace!("Keep-alive"),
                    Ok(job) => (self.handler)(job),
                    Err(e) => log::warn!("Skipping undecodable stream event: {}", e),
                }
            }
        }
        Ok(())
    }
}

async fn run_stream(task: StreamTask) {
    let mut ever_opened = false;
    let mut failed_attempts = 0u32;

    loop {
        task.set_state(ConnectionState::Connecting);
        let err = match task.connect_and_read(&mut ever_opened).await {
            Ok(()) => StreamError::Closed,
            Err(e) => e,
        };
        if !ever_opened {
            failed_attempts += 1;
        }

        match task.policy.decide(ever_opened, failed_attempts) {
            ReconnectDecision::Stop => {
                log::info!("Event stream ended: {}", err);
                task.set_state(ConnectionState::Disconnected);
                return;
            }
            ReconnectDecision::Retry { attempt, delay } => {
                log::warn!(
                    "Event stream attempt failed ({}); reconnect {}/{} in {:?}",
                    err,
                    attempt,
                    task.policy.max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            ReconnectDecision::GiveUp { attempts } => {
                let exhausted = StreamError::Exhausted { attempts };
                log::error!("Event stream unavailable: {} (last error: {})", exhausted, err);
                task.set_state(ConnectionState::Error);
                task.bus.notify(Notification::error(
                    "Live updates unavailable",
                    &format!("{} ({})", exhausted, err),
                ));
                return;
            }
        }
    }
}
