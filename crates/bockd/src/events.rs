//! Engine events and the bus they are published on.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What happened to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    /// The init process exited.
    Die,
    /// The kernel reported an out-of-memory condition.
    Oom,
    /// Processes were frozen.
    Pause,
    /// Processes were thawed.
    Unpause,
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Die => "die",
            Self::Oom => "oom",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
        };
        f.write_str(s)
    }
}

/// An event about one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEvent {
    /// Container id.
    pub id: String,
    /// Event kind.
    pub action: EventAction,
    /// Extra key/value details, such as `exitCode`.
    pub attributes: HashMap<String, String>,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

impl ContainerEvent {
    /// Event stamped with the current time.
    pub fn new(id: impl Into<String>, action: EventAction, attributes: HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            action,
            attributes,
            timestamp: Utc::now(),
        }
    }
}

/// Event bus for container events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ContainerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }
}

impl EventBus {
    /// Create a new event bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        self.sender.subscribe()
    }

    /// Publish an event.
    pub fn publish(&self, event: ContainerEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let bus = EventBus::new();
        bus.publish(ContainerEvent::new("early", EventAction::Pause, HashMap::new()));

        let mut rx = bus.subscribe();
        let attrs = HashMap::from([("exitCode".to_string(), "3".to_string())]);
        bus.publish(ContainerEvent::new("c1", EventAction::Die, attrs));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.id, "c1");
        assert_eq!(event.action, EventAction::Die);
        assert_eq!(event.attributes["exitCode"], "3");
    }

    #[test]
    fn action_names() {
        assert_eq!(EventAction::Unpause.to_string(), "unpause");
        assert_eq!(serde_json::to_string(&EventAction::Oom).unwrap(), "\"oom\"");
    }
}
