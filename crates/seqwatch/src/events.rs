//! Client-wide publish/subscribe channel.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{AlignJob, AlignTool, JobStatus};
use crate::stream::ConnectionState;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Transient, dismissable message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub description: String,
}

impl Notification {
    pub fn new(level: NotificationLevel, title: &str, description: &str) -> Self {
        Self {
            level,
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    pub fn info(title: &str, description: &str) -> Self {
        Self::new(NotificationLevel::Info, title, description)
    }

    pub fn success(title: &str, description: &str) -> Self {
        Self::new(NotificationLevel::Success, title, description)
    }

    pub fn warning(title: &str, description: &str) -> Self {
        Self::new(NotificationLevel::Warning, title, description)
    }

    pub fn error(title: &str, description: &str) -> Self {
        Self::new(NotificationLevel::Error, title, description)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Something changed server-side; listeners should refresh now.
    DataChanged { reason: String },
    /// A push observation changed the held page.
    JobUpdated { job: AlignJob },
    /// The held page was replaced or altered.
    WindowChanged { page: u32, len: usize },
    /// A followed task reported a new status.
    TaskUpdated {
        task_id: String,
        status: JobStatus,
        tool: Option<AlignTool>,
        result_file: Option<String>,
        error: Option<String>,
    },
    Notification(Notification),
    ConnectionChanged { state: ConnectionState },
    HealthChanged { up: bool, details: String },
}

/// Cloneable handle to the client event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<ClientEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publishes an event. Having no subscribers is fine.
    pub fn publish(&self, event: ClientEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    pub fn notify(&self, notification: Notification) {
        self.publish(ClientEvent::Notification(notification));
    }

    /// Asks every listener to refresh out of band.
    pub fn data_changed(&self, reason: &str) {
        self.publish(ClientEvent::DataChanged {
            reason: reason.to_string(),
        });
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
