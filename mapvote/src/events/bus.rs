//! Event bus for vote lifecycle observers
//!
//! Pub/sub over a Tokio broadcast channel. Publishing never blocks and never
//! fails the vote: with no subscribers the event is simply dropped.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::VoteEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast bus for [`VoteEvent`]s
pub struct EventBus {
    sender: broadcast::Sender<VoteEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers. Returns the receiver count.
    pub fn publish(&self, event: VoteEvent) -> usize {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "Event published");
                count
            }
            Err(_) => {
                debug!(event_type, "Event published (no receivers)");
                0
            }
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<VoteEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if the bus has any subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MapEntry;
    use chrono::Utc;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        let delivered = bus.publish(VoteEvent::MapReset {
            map_name: "de_dust2".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(delivered, 1);

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "map_reset");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(VoteEvent::Nominated {
            participant: 42,
            map: MapEntry::new("1", "Mirage"),
            timestamp: Utc::now(),
        });

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1, e2);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert!(!bus.has_subscribers());
        let delivered = bus.publish(VoteEvent::MapReset {
            map_name: "de_inferno".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(delivered, 0);
    }
}
