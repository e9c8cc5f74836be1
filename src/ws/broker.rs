use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::models::ServerMessage;
use crate::ws::topics::Topic;

/// A serialized server frame, shared by every subscriber of a topic
pub type Frame = Arc<str>;

/// In-process pub/sub keyed by topic name.
///
/// A payload is serialized once per publish and the same frame is handed to
/// every subscriber. Each topic is one broadcast channel, so subscribers see
/// messages of a topic in publish order.
pub struct Broker {
    topics: Mutex<HashMap<String, broadcast::Sender<Frame>>>,
    capacity: usize,
}

impl Broker {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Frame>>> {
        self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Render the frame a subscriber of `topic` receives for `payload`
    pub fn frame<T: Serialize>(topic: &Topic, payload: &T) -> Option<Frame> {
        match serde_json::to_value(payload) {
            Ok(body) => {
                let msg = ServerMessage::Message { topic: topic.to_string(), body };
                Some(Arc::from(msg.to_text()))
            }
            Err(e) => {
                error!("Failed to serialize payload for topic {}: {}", topic, e);
                None
            }
        }
    }

    /// Publish to every current subscriber of `topic`. Returns the number of
    /// receivers reached; nobody listening is not an error.
    pub fn publish<T: Serialize>(&self, topic: &Topic, payload: &T) -> usize {
        let Some(frame) = Self::frame(topic, payload) else {
            return 0;
        };

        let key = topic.to_string();
        let sender = self.lock().get(&key).cloned();
        match sender {
            Some(tx) => match tx.send(frame) {
                Ok(n) => {
                    debug!("Published on {} to {} subscriber(s)", key, n);
                    n
                }
                Err(_) => {
                    debug!("No subscribers left on {}", key);
                    self.prune(topic);
                    0
                }
            },
            None => {
                debug!("No subscribers on {}", key);
                0
            }
        }
    }

    pub fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<Frame> {
        let mut topics = self.lock();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop the channel of `topic` if nobody listens to it anymore
    pub fn prune(&self, topic: &Topic) {
        let key = topic.to_string();
        let mut topics = self.lock();
        if topics.get(&key).is_some_and(|tx| tx.receiver_count() == 0) {
            topics.remove(&key);
        }
    }

    pub fn topic_count(&self) -> usize {
        self.lock().len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().values().map(|tx| tx.receiver_count()).sum()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(256)
    }
}
