//! Application-level broadcast of change events.
//!
//! Workspace sessions forward their provider's change feed here so that
//! UIs can listen without holding a provider subscription of their own.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::DevlogEvent;

pub const DEFAULT_CAPACITY: usize = 1024;

/// A change event tagged with the workspace it happened in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceEvent {
    pub workspace_id: String,
    pub event: DevlogEvent,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WorkspaceEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish(&self, workspace_id: &str, event: DevlogEvent) {
        let event = WorkspaceEvent {
            workspace_id: workspace_id.to_string(),
            event,
        };
        // No receivers is fine.
        if self.tx.send(event).is_err() {
            debug!(workspace = workspace_id, "change event dropped, no listeners");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_to_every_receiver() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish("default", DevlogEvent::deleted(7));

        for rx in [&mut a, &mut b] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.workspace_id, "default");
            assert_eq!(event.event.entry_id(), Some(7));
        }
    }

    #[test]
    fn publishing_without_receivers_is_harmless() {
        let bus = EventBus::new(4);
        bus.publish("default", DevlogEvent::deleted(1));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn serializes_camel_case() {
        let event = WorkspaceEvent {
            workspace_id: "w1".into(),
            event: DevlogEvent::deleted(3),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["workspaceId"], "w1");
        assert_eq!(json["event"]["type"], "deleted");
    }
}
