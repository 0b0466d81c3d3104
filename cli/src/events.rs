//! Prints client events to the terminal.

use log::{debug, info, warn};
use seqwatch::events::{ClientEvent, EventBus, Notification, NotificationLevel};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

fn level_tag(level: NotificationLevel) -> &'static str {
    match level {
        NotificationLevel::Info => "info",
        NotificationLevel::Success => "done",
        NotificationLevel::Warning => "warn",
        NotificationLevel::Error => "error",
    }
}

pub fn format_notification(n: &Notification) -> String {
    if n.description.is_empty() {
        format!("[{}] {}", level_tag(n.level), n.title)
    } else {
        format!("[{}] {}: {}", level_tag(n.level), n.title, n.description)
    }
}

/// Starts a task echoing notifications and connection changes to stderr.
pub fn start_event_bridge(bus: &EventBus) -> JoinHandle<()> {
    info!("Starting event bridge");
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ClientEvent::Notification(n)) => eprintln!("{}", format_notification(&n)),
                Ok(ClientEvent::ConnectionChanged { state }) => {
                    eprintln!("[stream] {}", state);
                }
                Ok(ClientEvent::HealthChanged { up, details }) => {
                    eprintln!("[health] {} {}", if up { "up" } else { "down" }, details);
                }
                Ok(other) => debug!("Event: {:?}", other),
                Err(RecvError::Lagged(n)) => {
                    warn!("Event bridge lagged, missed {} events", n);
                }
                Err(RecvError::Closed) => {
                    info!("Event bus closed, stopping event bridge");
                    break;
                }
            }
        }
    })
}
