//! iotguard -- anomaly-detection layer for an IoT telemetry pipeline.
//!
//! This crate provides the ingestion sink, the append-only telemetry log,
//! the isolation-forest classifier, and the monitor loop that turns new log
//! rows into per-record alerts on the message bus.

pub mod api;
pub mod bus;
pub mod config;
pub mod detect;
pub mod ingest;
pub mod monitor;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::bus::{mqtt, Publisher};
use crate::config::Config;
use crate::detect::{AlertDispatcher, AnomalyClassifier};
use crate::ingest::IngestionSink;
use crate::monitor::{MonitorLoop, SharedStats};
use crate::storage::RecordStore;

/// Run collector, monitor and status API in one process over a single
/// broker connection.
pub async fn serve(config: Config, cancel: CancellationToken) -> Result<()> {
    let store = open_store(&config)?;
    let classifier = load_classifier(&config)?;

    let (publisher, subscription) = mqtt::connect(
        &config.broker,
        &config.broker.client_id,
        vec![config.broker.subscribe.clone()],
    );
    let publisher: Arc<dyn Publisher> = Arc::new(publisher);

    let sink = Arc::new(IngestionSink::new(store.clone(), &config.storage));
    let collector = tokio::spawn(ingest::run_collector(sink, subscription, cancel.clone()));

    let stats = SharedStats::default();
    let monitor = build_monitor(&config, store.clone(), classifier, publisher, stats.clone());
    let monitor = tokio::spawn(monitor.run(cancel.clone()));

    let api = spawn_api(&config, store, stats, cancel.clone()).await?;

    tracing::info!(
        subscribe = %config.broker.subscribe,
        alert_topic = %config.broker.alert_topic,
        "iotguard running"
    );

    collector.await.context("collector task panicked")?;
    // Collector exits early if the subscription closes; stop the rest too.
    cancel.cancel();
    monitor.await.context("monitor task panicked")?;
    if let Some(api) = api {
        api.await.context("API task panicked")??;
    }
    Ok(())
}

/// Run only the ingestion side.
pub async fn collect(config: Config, cancel: CancellationToken) -> Result<()> {
    let store = open_store(&config)?;
    let client_id = format!("{}-collector", config.broker.client_id);
    let (_publisher, subscription) = mqtt::connect(
        &config.broker,
        &client_id,
        vec![config.broker.subscribe.clone()],
    );

    let sink = Arc::new(IngestionSink::new(store, &config.storage));
    ingest::run_collector(sink, subscription, cancel).await;
    Ok(())
}

/// Run only the monitor side, plus the status API when enabled.
pub async fn monitor(config: Config, cancel: CancellationToken) -> Result<()> {
    let store = Arc::new(RecordStore::new(&config.storage.csv_path));
    let classifier = load_classifier(&config)?;

    let client_id = format!("{}-monitor", config.broker.client_id);
    let (publisher, subscription) = mqtt::connect(&config.broker, &client_id, Vec::new());
    let driver = tokio::spawn(subscription.drive());

    let stats = SharedStats::default();
    let api = spawn_api(&config, store.clone(), stats.clone(), cancel.clone()).await?;

    build_monitor(&config, store, classifier, Arc::new(publisher), stats)
        .run(cancel)
        .await;

    driver.abort();
    if let Some(api) = api {
        api.await.context("API task panicked")??;
    }
    Ok(())
}

pub fn build_monitor(
    config: &Config,
    store: Arc<RecordStore>,
    classifier: AnomalyClassifier,
    publisher: Arc<dyn Publisher>,
    stats: SharedStats,
) -> MonitorLoop {
    let dispatcher = AlertDispatcher::new(publisher, config.broker.alert_topic.clone());
    MonitorLoop::new(store, classifier, dispatcher, &config.monitor, stats)
}

/// Load the model artifact. Failure is fatal; the process cannot classify
/// without it.
pub fn load_classifier(config: &Config) -> Result<AnomalyClassifier> {
    AnomalyClassifier::load(&config.model.path)
        .with_context(|| format!("failed to load model from {}", config.model.path.display()))
}

fn open_store(config: &Config) -> Result<Arc<RecordStore>> {
    let store = RecordStore::new(&config.storage.csv_path);
    store.create().context("failed to initialize telemetry log")?;
    Ok(Arc::new(store))
}

type ApiTask = tokio::task::JoinHandle<std::io::Result<()>>;

async fn spawn_api(
    config: &Config,
    store: Arc<RecordStore>,
    stats: SharedStats,
    cancel: CancellationToken,
) -> Result<Option<ApiTask>> {
    if !config.api.enabled {
        return Ok(None);
    }

    let addr: std::net::SocketAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("invalid API bind address: {}", config.api.bind))?;
    let app = api::router(api::state::AppState {
        stats,
        store,
        alert_topic: config.broker.alert_topic.clone(),
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status API on {addr}"))?;
    tracing::info!(%addr, "Status API listening");

    Ok(Some(tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
    })))
}
