use serde::Serialize;

use crate::storage::TelemetryRecord;

/// Feature order expected by the model.
pub const FEATURE_NAMES: [&str; 3] = ["temp", "humidity", "message_rate"];
pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Classifier input for one record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector {
    pub temp: f64,
    pub humidity: f64,
    pub message_rate: f64,
}

impl FeatureVector {
    /// Missing signals become `0`; the row is never dropped.
    pub fn from_record(record: &TelemetryRecord) -> Self {
        Self {
            temp: record.temp.unwrap_or(0.0),
            humidity: record.humidity.unwrap_or(0.0),
            message_rate: record.message_rate.unwrap_or(0) as f64,
        }
    }

    pub fn to_vector(&self) -> Vec<f64> {
        vec![self.temp, self.humidity, self.message_rate]
    }
}

/// One vector per record, in record order.
pub fn extract(records: &[TelemetryRecord]) -> Vec<FeatureVector> {
    records.iter().map(FeatureVector::from_record).collect()
}
