//! Payload -> `TelemetryRecord`.
//!
//! Lenient by design of the wire contract: a well-formed JSON object always
//! yields a record, with absent or unusable fields defaulted. Only payloads
//! that are not a JSON object at all are rejected.

use serde_json::{Map, Value};

use crate::ingest::IngestError;
use crate::storage::{TelemetryRecord, UNKNOWN};

pub fn normalize(topic: &str, payload: &[u8], now: i64) -> Result<TelemetryRecord, IngestError> {
    let parse_failure = |reason: String| IngestError::ParseFailure {
        topic: topic.to_string(),
        reason,
    };

    let text = std::str::from_utf8(payload).map_err(|e| parse_failure(format!("not UTF-8: {e}")))?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| parse_failure(format!("invalid JSON: {e}")))?;
    let Value::Object(fields) = value else {
        return Err(parse_failure("payload is not a JSON object".to_string()));
    };

    Ok(TelemetryRecord {
        timestamp: now,
        client_id: client_id(&fields),
        topic: single_line(topic),
        payload_size: payload.len() as u64,
        temp: Some(float_field(&fields, "temp")),
        humidity: Some(float_field(&fields, "humidity")),
        message_rate: Some(float_field(&fields, "message_rate").trunc() as i64),
    })
}

fn client_id(fields: &Map<String, Value>) -> String {
    let id = match fields.get("client_id") {
        Some(Value::String(s)) => single_line(s),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    };
    if id.trim().is_empty() {
        UNKNOWN.to_string()
    } else {
        id
    }
}

/// Numbers and numeric strings are accepted; anything else is `0`.
fn float_field(fields: &Map<String, Value>, key: &str) -> f64 {
    let parsed = match fields.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Rows are line-delimited; keep identity strings on one line.
fn single_line(s: &str) -> String {
    s.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}
