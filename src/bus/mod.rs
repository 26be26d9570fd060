//! Publish/subscribe seam shared by the ingestion and alert sides.
//!
//! Components receive a [`Publisher`] or a [`Subscription`] at construction;
//! nothing in the pipeline reaches for a global client.

pub mod memory;
pub mod mqtt;

pub use self::memory::{MemoryBus, MemorySubscription};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish to {topic} failed: {reason}")]
    PublishFailure { topic: String, reason: String },

    #[error("subscribe to {filter} failed: {reason}")]
    SubscribeFailure { filter: String, reason: String },
}

/// One message as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Outbound half of the bus.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// Inbound half of the bus.
#[async_trait::async_trait]
pub trait Subscription: Send {
    /// Wait for the next message matching the subscription. `None` once the
    /// bus is closed.
    async fn next_message(&mut self) -> Option<BusMessage>;
}

/// MQTT topic filter matching: `+` matches one level, a trailing `#` matches
/// the remaining levels (including none). Wildcards in the first level do
/// not match `$`-prefixed system topics.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    for level in filter.split('/') {
        match level {
            "#" => return true,
            "+" => {
                if topic_levels.next().is_none() {
                    return false;
                }
            }
            exact => match topic_levels.next() {
                Some(t) if t == exact => {}
                _ => return false,
            },
        }
    }
    topic_levels.next().is_none()
}
