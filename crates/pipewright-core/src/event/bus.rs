//! Broadcast event bus for distributing `OrchestrationEvent` to subscribers.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op; the bus is an observability hook, never part of the
//! correctness path.

use pipewright_types::event::OrchestrationEvent;
use tokio::sync::broadcast;

/// Multi-consumer bus for orchestration events.
///
/// Cloning the bus clones the sender, allowing multiple producers and
/// consumers.
pub struct EventBus {
    sender: broadcast::Sender<OrchestrationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: OrchestrationEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
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
    use pipewright_types::status::Status;
    use uuid::Uuid;

    fn sample_event() -> OrchestrationEvent {
        OrchestrationEvent::PlanFinished {
            plan_execution_id: Uuid::now_v7(),
            status: Status::Succeeded,
        }
    }

    #[tokio::test]
    async fn publish_and_subscribe_delivers_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(sample_event());

        let received = rx.recv().await.unwrap();
        assert!(matches!(
            received,
            OrchestrationEvent::PlanFinished { status: Status::Succeeded, .. }
        ));
    }

    #[tokio::test]
    async fn clone_shares_channel() {
        let bus = EventBus::new(16);
        let clone = bus.clone();
        let mut rx = bus.subscribe();

        clone.publish(sample_event());

        assert!(rx.recv().await.is_ok());
        assert_eq!(clone.subscriber_count(), 1);
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let bus = EventBus::new(4);
        bus.publish(sample_event());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
