use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

/// Running counters of the monitor loop, read by the status API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStats {
    pub ticks: u64,
    pub processing_ticks: u64,
    pub failed_ticks: u64,
    pub records_processed: u64,
    pub normal: u64,
    pub anomaly: u64,
    pub publish_failures: u64,
    /// Last classified position.
    pub cursor: Option<usize>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub type SharedStats = Arc<RwLock<MonitorStats>>;
