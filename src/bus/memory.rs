//! In-process broker on a tokio broadcast channel.
//!
//! Used when collector and monitor share a process without an external
//! broker, and by the test suite.

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

use crate::bus::{topic_matches, BusError, BusMessage, Publisher, Subscription};

#[derive(Debug, Clone)]
pub struct MemoryBus {
    tx: broadcast::Sender<BusMessage>,
}

impl MemoryBus {
    /// `capacity` bounds how far a slow subscriber may lag before it starts
    /// losing messages.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self, filter: impl Into<String>) -> MemorySubscription {
        MemorySubscription {
            rx: self.tx.subscribe(),
            filter: filter.into(),
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait::async_trait]
impl Publisher for MemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        // No subscribers is not an error, same as a broker with no listeners.
        let _ = self.tx.send(BusMessage::new(topic, payload));
        Ok(())
    }
}

pub struct MemorySubscription {
    rx: broadcast::Receiver<BusMessage>,
    filter: String,
}

impl MemorySubscription {
    /// Next already-delivered matching message, without waiting.
    pub fn try_next(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) if topic_matches(&self.filter, &msg.topic) => return Some(msg),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(filter = %self.filter, skipped, "Subscriber lagged, messages lost");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain every matching message delivered so far.
    pub fn drain(&mut self) -> Vec<BusMessage> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}

#[async_trait::async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if topic_matches(&self.filter, &msg.topic) => return Some(msg),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(filter = %self.filter, skipped, "Subscriber lagged, messages lost");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
