//! Telemetry ingestion: bus message -> normalized record -> log append.

pub mod normalize;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{BusMessage, Subscription};
use crate::config::StorageConfig;
use crate::storage::{RecordStore, StoreError, TelemetryRecord};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed payload on {topic}: {reason}")]
    ParseFailure { topic: String, reason: String },

    #[error("append failed after {attempts} attempts: {source}")]
    Store {
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

/// Turns inbound messages into log rows. One append per accepted message, no
/// deduplication.
pub struct IngestionSink {
    store: Arc<RecordStore>,
    retries: u32,
    backoff: Duration,
}

impl IngestionSink {
    pub fn new(store: Arc<RecordStore>, config: &StorageConfig) -> Self {
        Self {
            store,
            retries: config.append_retries.max(1),
            backoff: Duration::from_millis(config.append_backoff_ms),
        }
    }

    /// Normalize and append one message.
    pub async fn ingest(&self, msg: &BusMessage) -> Result<TelemetryRecord, IngestError> {
        let record = normalize::normalize(&msg.topic, &msg.payload, chrono::Utc::now().timestamp())?;
        self.append_with_retry(&record).await?;
        Ok(record)
    }

    /// Entry point for the collector loop. Failures are logged and the
    /// message dropped; nothing propagates.
    pub async fn on_message(&self, msg: &BusMessage) {
        match self.ingest(msg).await {
            Ok(record) => {
                debug!(
                    topic = %record.topic,
                    client = %record.client_id,
                    temp = record.temp.unwrap_or_default(),
                    humidity = record.humidity.unwrap_or_default(),
                    rate = record.message_rate.unwrap_or_default(),
                    "Logged"
                );
            }
            Err(e @ IngestError::ParseFailure { .. }) => {
                warn!(stage = "ingest", error = %e, "Dropping message");
            }
            Err(e) => {
                error!(stage = "ingest", topic = %msg.topic, error = %e, "Dropping message");
            }
        }
    }

    async fn append_with_retry(&self, record: &TelemetryRecord) -> Result<(), IngestError> {
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match self.store.append(record) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retries => {
                    warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "Append failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(IngestError::Store {
                        attempts: attempt,
                        source: e,
                    })
                }
            }
        }
    }
}

/// Feed every message from `subscription` into `sink` until cancelled or the
/// subscription closes.
pub async fn run_collector<S: Subscription>(
    sink: Arc<IngestionSink>,
    mut subscription: S,
    cancel: CancellationToken,
) {
    info!("Collector started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = subscription.next_message() => match msg {
                Some(msg) => sink.on_message(&msg).await,
                None => {
                    warn!("Inbound subscription closed");
                    break;
                }
            },
        }
    }
    info!("Collector stopped");
}
