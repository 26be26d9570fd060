//! Append-only telemetry log -- record types, schema, CSV-backed store.

pub mod log;
pub mod schema;

pub use self::log::RecordStore;

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Placeholder for identity fields the publisher did not provide.
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unavailable at {}: {source}", path.display())]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record batch is missing required columns: {}", missing.join(", "))]
    SchemaMissing { missing: Vec<String> },
}

impl StoreError {
    /// True when the log file has not been created yet.
    pub fn is_not_created(&self) -> bool {
        matches!(
            self,
            StoreError::StoreUnavailable { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

/// One ingested reading.
///
/// Numeric signals are optional because rows read back from the log may carry
/// empty or unparsable cells. Records built by the ingestion sink always have
/// all three set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    /// Seconds since epoch at ingestion time.
    pub timestamp: i64,
    pub client_id: String,
    pub topic: String,
    /// Byte length of the raw inbound message.
    pub payload_size: u64,
    pub temp: Option<f64>,
    pub humidity: Option<f64>,
    pub message_rate: Option<i64>,
}

/// A contiguous slice of the log, starting at position `start`.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub start: usize,
    /// Header columns of the log the batch was read from.
    pub columns: Vec<String>,
    pub records: Vec<TelemetryRecord>,
    /// Complete records in the log at the time of the read.
    pub total: usize,
}

impl RecordBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Position of the last record in the batch.
    pub fn end(&self) -> Option<usize> {
        if self.records.is_empty() {
            None
        } else {
            Some(self.start + self.records.len() - 1)
        }
    }
}
