use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::bus::Publisher;
use crate::detect::Status;
use crate::storage::TelemetryRecord;

/// Outbound message for one classified record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub time: i64,
    pub client: String,
    pub topic: String,
    pub temp: f64,
    pub humidity: f64,
    pub rate: i64,
    pub status: Status,
}

impl AlertEvent {
    pub fn new(record: &TelemetryRecord, status: Status) -> Self {
        Self {
            time: record.timestamp,
            client: record.client_id.clone(),
            topic: record.topic.clone(),
            temp: record.temp.unwrap_or(0.0),
            humidity: record.humidity.unwrap_or(0.0),
            rate: record.message_rate.unwrap_or(0),
            status,
        }
    }
}

/// Outcome of dispatching one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub published: usize,
    pub failed: usize,
    pub normal: usize,
    pub anomaly: usize,
}

/// Publishes every classified record, normal or not, on one topic.
#[derive(Clone)]
pub struct AlertDispatcher {
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl AlertDispatcher {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish in record order. A failed publish is logged and counted; the
    /// rest of the batch still goes out.
    pub async fn dispatch(&self, records: &[TelemetryRecord], labels: &[Status]) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (record, status) in records.iter().zip(labels) {
            let event = AlertEvent::new(record, *status);
            match event.status {
                Status::Normal => report.normal += 1,
                Status::Anomaly => {
                    report.anomaly += 1;
                    warn!(
                        client = %event.client,
                        topic = %event.topic,
                        "Alert: T={:.1} H={:.1} R={}",
                        event.temp,
                        event.humidity,
                        event.rate
                    );
                }
            }

            let payload = match serde_json::to_vec(&event) {
                Ok(p) => p,
                Err(e) => {
                    error!(stage = "dispatch", client = %event.client, error = %e, "Failed to encode alert");
                    report.failed += 1;
                    continue;
                }
            };

            match self.publisher.publish(&self.topic, payload).await {
                Ok(()) => report.published += 1,
                Err(e) => {
                    error!(stage = "dispatch", client = %event.client, error = %e, "Alert publish failed");
                    report.failed += 1;
                }
            }
        }

        report
    }
}
