//! Broadcast event bus for distributing `WorkflowEvent` to subscribers.
//!
//! Publishing with no active subscribers is a no-op, so the engine and
//! registry can publish unconditionally.

use flowdesk_types::event::WorkflowEvent;
use tokio::sync::broadcast;

/// Default channel capacity used by the binary.
pub const DEFAULT_CAPACITY: usize = 256;

/// Multi-consumer bus for workflow events.
///
/// Cloning the bus clones the sender, so every clone feeds the same subscribers.
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Publish to all current subscribers, returning how many received it.
    pub fn publish(&self, event: WorkflowEvent) -> usize {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(delivered) => {
                tracing::trace!(kind, delivered, "workflow event published");
                delivered
            }
            Err(_) => 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdesk_types::execution::ExecutionRef;
    use uuid::Uuid;

    fn activation(version: u32) -> WorkflowEvent {
        WorkflowEvent::WorkflowActivated {
            workflow_id: Uuid::now_v7(),
            version,
            organization_id: "acme".to_string(),
            entity_type: "ticket".to_string(),
            archived_version: None,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_publish_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        assert_eq!(bus.publish(activation(1)), 1);
        bus.publish(WorkflowEvent::WatchersNotified {
            execution_ref: ExecutionRef::new("acme", "ticket", "T-1"),
            transition_id: "21".to_string(),
            audience: "watchers".to_string(),
            message: "moved to Done".to_string(),
        });

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, WorkflowEvent::WorkflowActivated { version: 1, .. }));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind(), "watchers_notified");
    }

    #[test]
    fn publish_without_subscribers_reports_zero() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(activation(1)), 0);
    }

    #[test]
    fn clones_share_subscribers() {
        let bus = EventBus::new(8);
        let producer = bus.clone();
        let mut rx = bus.subscribe();
        let _rx2 = producer.subscribe();

        assert_eq!(producer.publish(activation(3)), 2);
        assert!(rx.try_recv().is_ok());
        assert!(format!("{bus:?}").contains("receiver_count"));
    }
}
