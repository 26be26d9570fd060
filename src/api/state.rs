use std::sync::Arc;

use crate::monitor::SharedStats;
use crate::storage::RecordStore;

#[derive(Clone)]
pub struct AppState {
    pub stats: SharedStats,
    pub store: Arc<RecordStore>,
    pub alert_topic: String,
}
