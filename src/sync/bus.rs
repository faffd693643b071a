use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::sync::store::Origin;

pub const DEFAULT_CONVERSATION_BUFFER_CAPACITY: usize = 64;

/// A raw message payload routed to one conversation topic.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxEnvelope {
    pub conversation_id: String,
    pub origin: Origin,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventBusConfig {
    pub conversation_buffer_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            conversation_buffer_capacity: DEFAULT_CONVERSATION_BUFFER_CAPACITY,
        }
    }
}

/// Internal bus with one topic per conversation.
///
/// A topic exists only while someone listens to it. Receivers that fall more
/// than `conversation_buffer_capacity` events behind get `RecvError::Lagged`.
#[derive(Debug)]
pub struct EventBus {
    config: EventBusConfig,
    topics: RwLock<HashMap<String, broadcast::Sender<InboxEnvelope>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            config,
            topics: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe_conversation(&self, conversation_id: &str) -> broadcast::Receiver<InboxEnvelope> {
        if let Some(sender) = self.topic(conversation_id) {
            return sender.subscribe();
        }

        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                broadcast::channel(self.config.conversation_buffer_capacity.max(1)).0
            })
            .subscribe()
    }

    /// Drops the topic; its receivers see the channel close.
    pub fn remove_conversation(&self, conversation_id: &str) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        topics.remove(conversation_id).is_some()
    }

    /// Returns how many receivers got the event.
    pub fn publish(&self, conversation_id: &str, origin: Origin, payload: Value) -> usize {
        let Some(sender) = self.topic(conversation_id) else {
            // Nobody is looking at that conversation.
            return 0;
        };
        let envelope = InboxEnvelope {
            conversation_id: conversation_id.to_string(),
            origin,
            payload,
        };
        sender.send(envelope).unwrap_or(0)
    }

    fn topic(&self, conversation_id: &str) -> Option<broadcast::Sender<InboxEnvelope>> {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics.get(conversation_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};
    use tokio::time::timeout;

    use super::*;

    const TEST_TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn conversation_topic_only_sees_its_own_events() {
        let bus = EventBus::default();
        let mut c1 = bus.subscribe_conversation("c1");

        assert_eq!(bus.publish("c2", Origin::Push, json!({"n": 2})), 0);
        assert_eq!(bus.publish("c1", Origin::Push, json!({"n": 1})), 1);

        let got = timeout(TEST_TIMEOUT, c1.recv()).await.unwrap().unwrap();
        assert_eq!(got.conversation_id, "c1");
        assert_eq!(got.payload, json!({"n": 1}));
        assert!(matches!(c1.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn slow_receiver_is_told_how_many_events_it_missed() {
        let bus = EventBus::new(EventBusConfig {
            conversation_buffer_capacity: 2,
        });
        let mut c1 = bus.subscribe_conversation("c1");

        for n in 0..5 {
            bus.publish("c1", Origin::Push, json!({"n": n}));
        }

        assert!(matches!(c1.recv().await, Err(RecvError::Lagged(3))));
        let oldest_kept = timeout(TEST_TIMEOUT, c1.recv()).await.unwrap().unwrap();
        assert_eq!(oldest_kept.payload, json!({"n": 3}));
    }

    #[tokio::test]
    async fn removing_a_conversation_closes_its_receivers() {
        let bus = EventBus::default();
        let mut c1 = bus.subscribe_conversation("c1");

        assert!(bus.remove_conversation("c1"));
        assert!(!bus.remove_conversation("c1"));
        assert_eq!(bus.publish("c1", Origin::Push, json!({})), 0);

        let closed = timeout(TEST_TIMEOUT, c1.recv()).await.unwrap();
        assert!(matches!(closed, Err(RecvError::Closed)));
    }
}
