//! In-process message bus over broadcast channels.

use super::{Event, MessageBus, Subscription};
use commons::prelude_errors::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Per-topic broadcast capacity. Output chunks are bounded (4 KiB), so this
/// gives a slow subscriber roughly a megabyte of slack before it lags.
const DEFAULT_TOPIC_CAPACITY: usize = 256;

/// In-process bus; one broadcast channel per live topic.
pub struct MemoryBus {
    topics: Mutex<HashMap<String, broadcast::Sender<Event>>>,
    capacity: usize,
}

impl MemoryBus {
    /// Bus with the default per-topic capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    /// Bus with an explicit per-topic capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Number of topics currently held open by subscribers.
    pub fn live_topics(&self) -> usize {
        self.topics.lock().len()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for MemoryBus {
    fn publish(&self, topic: &str, event: Event) -> Fallible<()> {
        let mut topics = self.topics.lock();
        let terminal = event.is_terminal();
        if let Some(sender) = topics.get(topic) {
            // A send error means every subscriber is gone; at-most-once
            // delivery makes that a drop, not a failure.
            if sender.send(event).is_err() {
                topics.remove(topic);
            } else if terminal {
                // Nothing may follow a terminal event on this topic.
                topics.remove(topic);
            }
        } else {
            trace!("dropping message on subscriber-less topic {}", topic);
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = self.topics.lock();
        // Sweep topics whose last subscriber is gone; output topics end by
        // subscriber drop rather than by terminal event.
        topics.retain(|_, sender| sender.receiver_count() > 0);
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Subscription::new(sender.subscribe())
    }
}
