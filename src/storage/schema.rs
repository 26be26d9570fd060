//! Column layout of the telemetry log.

use crate::storage::StoreError;

/// Fixed column order of the CSV log. Written once as the header row.
pub const COLUMNS: [&str; 7] = [
    "timestamp",
    "client_id",
    "topic",
    "payload_size",
    "temp",
    "humidity",
    "message_rate",
];

/// Columns a batch must expose before it can be classified.
pub const REQUIRED_FEATURE_COLUMNS: [&str; 3] = ["temp", "humidity", "message_rate"];

/// Position of each known column inside a header row, `None` when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub timestamp: Option<usize>,
    pub client_id: Option<usize>,
    pub topic: Option<usize>,
    pub payload_size: Option<usize>,
    pub temp: Option<usize>,
    pub humidity: Option<usize>,
    pub message_rate: Option<usize>,
}

impl ColumnMap {
    /// Resolve column positions by name. Unknown columns are ignored, so a
    /// log with extra columns still reads.
    pub fn from_header<'a>(header: impl IntoIterator<Item = &'a str>) -> Self {
        let mut map = Self::default();
        for (idx, name) in header.into_iter().enumerate() {
            let slot = match name.trim() {
                "timestamp" => &mut map.timestamp,
                "client_id" => &mut map.client_id,
                "topic" => &mut map.topic,
                "payload_size" => &mut map.payload_size,
                "temp" => &mut map.temp,
                "humidity" => &mut map.humidity,
                "message_rate" => &mut map.message_rate,
                _ => continue,
            };
            // First occurrence wins on duplicated names.
            if slot.is_none() {
                *slot = Some(idx);
            }
        }
        map
    }
}

/// Check that every feature column is present in `columns`.
pub fn require_feature_columns(columns: &[String]) -> Result<(), StoreError> {
    let missing: Vec<String> = REQUIRED_FEATURE_COLUMNS
        .iter()
        .filter(|req| !columns.iter().any(|c| c.trim() == **req))
        .map(|s| s.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(StoreError::SchemaMissing { missing })
    }
}
