//! Background health checks against the backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::api::JobApi;
use crate::error::{ApiError, ConfigError};
use crate::events::{ClientEvent, EventBus, Notification};
use crate::model::HealthResponse;
use crate::polling::{PollOptions, Poller};

/// Checks health once. Transport failures come back as a `DOWN` answer.
pub async fn check_health(api: &dyn JobApi) -> HealthResponse {
    match api.health().await {
        Ok(health) => health,
        Err(e) => {
            log::debug!("Health check failed: {}", e);
            HealthResponse::unreachable(&e.to_string())
        }
    }
}

/// Polls the health endpoint on a fixed interval and publishes changes.
pub struct HealthMonitor {
    latest: watch::Receiver<Option<HealthResponse>>,
    _poller: Poller,
}

impl HealthMonitor {
    pub fn spawn(
        api: Arc<dyn JobApi>,
        interval: Duration,
        bus: EventBus,
    ) -> Result<Self, ConfigError> {
        let (tx, latest) = watch::channel(None);
        let tx = Arc::new(tx);

        let on_health = {
            let tx = Arc::clone(&tx);
            move |health: HealthResponse| record(&tx, &bus, health)
        };
        let on_failure = on_health.clone();

        let poller = Poller::spawn(
            interval,
            move || {
                let api = Arc::clone(&api);
                async move { api.health().await }
            },
            PollOptions::new()
                .immediate(true)
                .on_success(on_health)
                .on_error(move |e: ApiError| {
                    on_failure(HealthResponse::unreachable(&e.to_string()))
                }),
        )?;

        Ok(Self {
            latest,
            _poller: poller,
        })
    }

    /// Last answer, `None` before the first check completes.
    pub fn latest(&self) -> Option<HealthResponse> {
        self.latest.borrow().clone()
    }

    pub fn is_up(&self) -> bool {
        self.latest
            .borrow()
            .as_ref()
            .map(HealthResponse::is_up)
            .unwrap_or(false)
    }

    pub fn watch(&self) -> watch::Receiver<Option<HealthResponse>> {
        self.latest.clone()
    }
}

fn record(tx: &watch::Sender<Option<HealthResponse>>, bus: &EventBus, health: HealthResponse) {
    let up = health.is_up();
    let was_up = tx.borrow().as_ref().map(HealthResponse::is_up);
    let details = health.details.clone();
    tx.send_replace(Some(health));

    if was_up == Some(up) {
        return;
    }
    if up {
        log::info!("Backend is up");
    } else {
        log::warn!("Backend is down: {}", details);
        bus.notify(Notification::warning("Server unavailable", &details));
    }
    bus.publish(ClientEvent::HealthChanged { up, details });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HealthStatus;

    fn up() -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Up,
            timestamp: None,
            details: "ok".to_string(),
        }
    }

    #[tokio::test]
    async fn test_record_publishes_only_on_change() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let (tx, _latest) = watch::channel(None);

        record(&tx, &bus, up());
        record(&tx, &bus, up());
        record(&tx, &bus, HealthResponse::unreachable("connection refused"));

        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::HealthChanged {
                up: true,
                details: "ok".to_string()
            }
        );
        assert!(matches!(rx.try_recv().unwrap(), ClientEvent::Notification(_)));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ClientEvent::HealthChanged { up: false, .. }
        ));
        assert!(rx.try_recv().is_err());
    }
}
