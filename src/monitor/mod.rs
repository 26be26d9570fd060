//! Monitor control loop: tail the log, classify new rows, dispatch alerts.
//!
//! Each tick reads everything after the cursor in one pass. The cursor only
//! moves after the whole suffix has been classified and dispatched, so a
//! failed tick is retried from the same position on the next one.

pub mod cursor;
pub mod stats;

pub use self::cursor::{CursorFile, TailCursor};
pub use self::stats::{MonitorStats, SharedStats};

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::detect::summary::BatchSummary;
use crate::detect::{features, AlertDispatcher, AnomalyClassifier, ClassifyError, DispatchReport};
use crate::storage::{schema, RecordStore, StoreError};

#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error("log read task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl TickError {
    /// Pipeline stage the failure belongs to, for logs.
    pub fn stage(&self) -> &'static str {
        match self {
            TickError::Store(StoreError::SchemaMissing { .. }) => "schema",
            TickError::Store(_) | TickError::Join(_) => "store",
            TickError::Classify(_) => "classify",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    /// Log exists but holds no records.
    Empty,
    NoNewData,
    /// Cursor pointed past the end of the log and was reset.
    Rewound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle(IdleReason),
    Processed {
        start: usize,
        end: usize,
        report: DispatchReport,
    },
}

pub struct MonitorLoop {
    store: Arc<RecordStore>,
    classifier: AnomalyClassifier,
    dispatcher: AlertDispatcher,
    cursor: TailCursor,
    cursor_file: Option<CursorFile>,
    interval: Duration,
    idle_log_every: u64,
    iteration: u64,
    stats: SharedStats,
}

impl MonitorLoop {
    /// Build the loop. With a cursor sidecar configured, the persisted cursor
    /// is restored; otherwise the whole log is classified on the first tick.
    pub fn new(
        store: Arc<RecordStore>,
        classifier: AnomalyClassifier,
        dispatcher: AlertDispatcher,
        config: &MonitorConfig,
        stats: SharedStats,
    ) -> Self {
        let cursor_file = config.cursor_path.clone().map(CursorFile::new);
        let cursor = match cursor_file.as_ref().map(CursorFile::load) {
            Some(Ok(Some(cursor))) => {
                info!(last = ?cursor.last(), "Resuming from persisted cursor");
                cursor
            }
            Some(Ok(None)) | None => TailCursor::new(),
            Some(Err(e)) => {
                warn!(stage = "cursor", error = %e, "Ignoring unreadable cursor file");
                TailCursor::new()
            }
        };

        Self {
            store,
            classifier,
            dispatcher,
            cursor,
            cursor_file,
            interval: config.interval(),
            idle_log_every: config.idle_log_every.max(1),
            iteration: 0,
            stats,
        }
    }

    pub fn cursor(&self) -> TailCursor {
        self.cursor
    }

    /// One pass of the loop.
    pub async fn tick(&mut self) -> Result<TickOutcome, TickError> {
        let start = self.cursor.next_position();
        let store = self.store.clone();
        let batch = tokio::task::spawn_blocking(move || store.read_from(start)).await??;

        if batch.total == 0 {
            return Ok(TickOutcome::Idle(IdleReason::Empty));
        }
        if start > batch.total {
            warn!(
                cursor = ?self.cursor.last(),
                records = batch.total,
                "Cursor is past the end of the log, starting over"
            );
            self.cursor.reset();
            self.persist_cursor();
            return Ok(TickOutcome::Idle(IdleReason::Rewound));
        }
        let Some(end) = batch.end() else {
            return Ok(TickOutcome::Idle(IdleReason::NoNewData));
        };

        info!(start, end, rows = batch.len(), "Processing new rows");
        schema::require_feature_columns(&batch.columns)?;

        let features = features::extract(&batch.records);
        if let Some(summary) = BatchSummary::of(&features) {
            info!(
                temp = %summary.temp,
                humidity = %summary.humidity,
                rate = %summary.message_rate,
                "Data range"
            );
        }

        let labels = self.classifier.classify(&features)?;
        let report = self.dispatcher.dispatch(&batch.records, &labels).await;

        info!(
            normal = report.normal,
            anomaly = report.anomaly,
            published = report.published,
            failed = report.failed,
            "Predictions dispatched"
        );
        if report.anomaly > 0 {
            warn!(count = report.anomaly, "Anomalies detected");
        }

        self.cursor.advance_to(end);
        self.persist_cursor();
        Ok(TickOutcome::Processed { start, end, report })
    }

    /// Tick every `interval` until `cancel` fires. Cancellation is only
    /// observed between ticks.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            alert_topic = %self.dispatcher.topic(),
            "Monitor started"
        );

        while !cancel.is_cancelled() {
            self.iteration += 1;
            let result = self.tick().await;
            self.observe(&result).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!(cursor = ?self.cursor.last(), "Monitor stopped");
    }

    fn quiet_tick(&self) -> bool {
        self.iteration % self.idle_log_every != 1 % self.idle_log_every
    }

    async fn observe(&self, result: &Result<TickOutcome, TickError>) {
        {
            let mut stats = self.stats.write().await;
            stats.ticks += 1;
            stats.cursor = self.cursor.last();
            stats.last_tick_at = Some(chrono::Utc::now());
            match result {
                Ok(TickOutcome::Processed { start, end, report }) => {
                    stats.processing_ticks += 1;
                    stats.records_processed += (end - start + 1) as u64;
                    stats.normal += report.normal as u64;
                    stats.anomaly += report.anomaly as u64;
                    stats.publish_failures += report.failed as u64;
                    stats.last_error = None;
                }
                Ok(TickOutcome::Idle(_)) => {}
                Err(e) => {
                    stats.failed_ticks += 1;
                    stats.last_error = Some(e.to_string());
                }
            }
        }

        match result {
            Ok(TickOutcome::Idle(reason)) if !self.quiet_tick() => match reason {
                IdleReason::Empty => info!("Telemetry log is empty"),
                IdleReason::NoNewData => {
                    info!(processed_up_to = ?self.cursor.last(), "No new data")
                }
                IdleReason::Rewound => {}
            },
            Ok(_) => {}
            Err(TickError::Store(e)) if e.is_not_created() => {
                if !self.quiet_tick() {
                    info!(path = %self.store.path().display(), "Waiting for telemetry log");
                }
            }
            Err(e) => {
                error!(stage = e.stage(), error = %e, cursor = ?self.cursor.last(), "Tick failed, will retry");
            }
        }
    }

    fn persist_cursor(&self) {
        let Some(file) = &self.cursor_file else {
            return;
        };
        match file.save(&self.cursor) {
            Ok(()) => debug!(path = %file.path().display(), last = ?self.cursor.last(), "Cursor saved"),
            Err(e) => warn!(stage = "cursor", error = %e, "Failed to persist cursor"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusMessage, MemoryBus, MemorySubscription};
    use crate::detect::classifier::tests::FixedModel;
    use crate::detect::{AlertEvent, Status, NATIVE_INLIER, NATIVE_OUTLIER};
    use crate::storage::TelemetryRecord;
    use std::path::PathBuf;

    struct Harness {
        dir: tempfile::TempDir,
        store: Arc<RecordStore>,
        bus: MemoryBus,
        alerts: MemorySubscription,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(RecordStore::new(dir.path().join("log.csv")));
            store.create().unwrap();
            let bus = MemoryBus::new(256);
            let alerts = bus.subscribe("security/alert");
            Self {
                dir,
                store,
                bus,
                alerts,
            }
        }

        fn cursor_path(&self) -> PathBuf {
            self.dir.path().join("cursor.json")
        }

        fn monitor(&self, labels: Vec<i8>, cursor_path: Option<PathBuf>) -> MonitorLoop {
            let config = MonitorConfig {
                cursor_path,
                ..MonitorConfig::default()
            };
            MonitorLoop::new(
                self.store.clone(),
                AnomalyClassifier::new(FixedModel { width: 3, labels }),
                AlertDispatcher::new(Arc::new(self.bus.clone()), "security/alert"),
                &config,
                SharedStats::default(),
            )
        }

        fn append(&self, n: usize) {
            for i in 0..n {
                self.store
                    .append(&TelemetryRecord {
                        timestamp: 1_700_000_000 + i as i64,
                        client_id: format!("c{i}"),
                        topic: "iot/test".to_string(),
                        payload_size: 42,
                        temp: Some(25.0),
                        humidity: Some(50.0),
                        message_rate: Some(5),
                    })
                    .unwrap();
            }
        }

        fn published(&mut self) -> Vec<AlertEvent> {
            self.alerts
                .drain()
                .into_iter()
                .map(|m: BusMessage| serde_json::from_slice(&m.payload).unwrap())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_n_records_yield_n_alerts() {
        let mut h = Harness::new();
        let mut monitor = h.monitor(vec![NATIVE_INLIER; 16], None);
        h.append(5);

        let outcome = monitor.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Processed { start: 0, end: 4, .. }));
        assert_eq!(h.published().len(), 5);
        assert_eq!(monitor.cursor().last(), Some(4));
    }

    #[tokio::test]
    async fn test_noop_tick_is_idempotent() {
        let mut h = Harness::new();
        let mut monitor = h.monitor(vec![NATIVE_INLIER; 16], None);

        assert_eq!(monitor.tick().await.unwrap(), TickOutcome::Idle(IdleReason::Empty));
        h.append(2);
        monitor.tick().await.unwrap();
        h.published();

        let before = monitor.cursor();
        assert_eq!(monitor.tick().await.unwrap(), TickOutcome::Idle(IdleReason::NoNewData));
        assert_eq!(monitor.cursor(), before);
        assert!(h.published().is_empty());
    }

    #[tokio::test]
    async fn test_only_new_suffix_is_processed() {
        let mut h = Harness::new();
        let mut monitor = h.monitor(vec![NATIVE_OUTLIER; 16], None);
        h.append(3);
        monitor.tick().await.unwrap();
        h.published();

        h.append(2);
        let outcome = monitor.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Processed { start: 3, end: 4, .. }));
        let alerts = h.published();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.status == Status::Anomaly));
    }

    #[tokio::test]
    async fn test_schema_missing_leaves_cursor_unchanged() {
        let mut h = Harness::new();
        std::fs::write(
            h.store.path(),
            "timestamp,client_id,topic,payload_size,temp\n1,a,iot/a,3,20.0\n",
        )
        .unwrap();
        let mut monitor = h.monitor(vec![NATIVE_INLIER; 4], None);

        let err = monitor.tick().await.unwrap_err();
        assert_eq!(err.stage(), "schema");
        assert_eq!(monitor.cursor().last(), None);
        assert!(h.published().is_empty());
    }

    #[tokio::test]
    async fn test_classification_failure_retries_same_suffix() {
        let mut h = Harness::new();
        h.append(2);
        // Model fitted on a different width fails every tick.
        let mut broken = MonitorLoop::new(
            h.store.clone(),
            AnomalyClassifier::new(FixedModel {
                width: 4,
                labels: vec![NATIVE_INLIER; 4],
            }),
            AlertDispatcher::new(Arc::new(h.bus.clone()), "security/alert"),
            &MonitorConfig::default(),
            SharedStats::default(),
        );
        let err = broken.tick().await.unwrap_err();
        assert_eq!(err.stage(), "classify");
        assert_eq!(broken.cursor().last(), None);
        assert!(h.published().is_empty());
    }

    #[tokio::test]
    async fn test_restart_without_sidecar_reprocesses_everything() {
        let mut h = Harness::new();
        h.append(3);
        h.monitor(vec![NATIVE_INLIER; 8], None).tick().await.unwrap();
        assert_eq!(h.published().len(), 3);

        let mut restarted = h.monitor(vec![NATIVE_INLIER; 8], None);
        restarted.tick().await.unwrap();
        assert_eq!(h.published().len(), 3, "duplicates after restart are expected");
    }

    #[tokio::test]
    async fn test_restart_with_sidecar_resumes() {
        let mut h = Harness::new();
        let path = h.cursor_path();
        h.append(3);
        h.monitor(vec![NATIVE_INLIER; 8], Some(path.clone()))
            .tick()
            .await
            .unwrap();
        h.published();

        let mut restarted = h.monitor(vec![NATIVE_INLIER; 8], Some(path.clone()));
        assert_eq!(restarted.cursor().last(), Some(2));
        assert_eq!(
            restarted.tick().await.unwrap(),
            TickOutcome::Idle(IdleReason::NoNewData)
        );

        h.append(1);
        let outcome = restarted.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Processed { start: 3, end: 3, .. }));
        assert_eq!(h.published().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_sidecar_is_discarded() {
        let mut h = Harness::new();
        let path = h.cursor_path();
        CursorFile::new(&path).save(&TailCursor::at(99)).unwrap();
        h.append(2);

        let mut monitor = h.monitor(vec![NATIVE_INLIER; 8], Some(path.clone()));
        assert_eq!(monitor.tick().await.unwrap(), TickOutcome::Idle(IdleReason::Rewound));
        assert_eq!(CursorFile::new(&path).load().unwrap(), Some(TailCursor::new()));

        monitor.tick().await.unwrap();
        assert_eq!(h.published().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_log_is_store_failure() {
        let h = Harness::new();
        std::fs::remove_file(h.store.path()).unwrap();
        let mut monitor = h.monitor(vec![], None);
        match monitor.tick().await {
            Err(TickError::Store(e)) => assert!(e.is_not_created()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel_and_updates_stats() {
        let mut h = Harness::new();
        h.append(2);
        let stats = SharedStats::default();
        let config = MonitorConfig {
            interval_secs: 3600,
            ..MonitorConfig::default()
        };
        let monitor = MonitorLoop::new(
            h.store.clone(),
            AnomalyClassifier::new(FixedModel {
                width: 3,
                labels: vec![NATIVE_INLIER, NATIVE_OUTLIER],
            }),
            AlertDispatcher::new(Arc::new(h.bus.clone()), "security/alert"),
            &config,
            stats.clone(),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.run(cancel.clone()));
        // First tick runs immediately; wait for it to land.
        for _ in 0..100 {
            if stats.read().await.ticks > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        task.await.unwrap();

        let snapshot = stats.read().await.clone();
        assert_eq!(snapshot.ticks, 1);
        assert_eq!(snapshot.records_processed, 2);
        assert_eq!(snapshot.normal, 1);
        assert_eq!(snapshot.anomaly, 1);
        assert_eq!(snapshot.cursor, Some(1));
        assert_eq!(h.published().len(), 2);
    }
}
