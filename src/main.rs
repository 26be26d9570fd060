use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use iotguard::config::{Config, LogFormat, LoggingConfig};
use iotguard::detect::summary::BatchSummary;
use iotguard::detect::{features, FeatureVector};
use iotguard::storage::RecordStore;

#[derive(Parser)]
#[command(
    name = "iotguard",
    about = "Anomaly-detection layer for IoT telemetry over MQTT",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start collector, monitor and status API in one process
    Serve,

    /// Subscribe to telemetry and append it to the log
    Collect,

    /// Tail the log, classify new rows and publish alerts
    Monitor,

    /// Classify a single reading with the configured model
    Classify {
        /// Temperature reading
        #[arg(long, allow_negative_numbers = true)]
        temp: f64,

        /// Relative humidity reading
        #[arg(long, allow_negative_numbers = true)]
        humidity: f64,

        /// Messages per interval reported by the device
        #[arg(long, allow_negative_numbers = true)]
        rate: i64,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show record count and signal ranges of the telemetry log
    Stats {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Serve => {
            tracing::info!(csv = %config.storage.csv_path.display(), "Starting iotguard");
            cancel_on_ctrl_c(cancel.clone());
            iotguard::serve(config, cancel).await?;
        }
        Commands::Collect => {
            tracing::info!(subscribe = %config.broker.subscribe, "Starting collector");
            cancel_on_ctrl_c(cancel.clone());
            iotguard::collect(config, cancel).await?;
        }
        Commands::Monitor => {
            tracing::info!(alert_topic = %config.broker.alert_topic, "Starting monitor");
            cancel_on_ctrl_c(cancel.clone());
            iotguard::monitor(config, cancel).await?;
        }
        Commands::Classify {
            temp,
            humidity,
            rate,
            json,
        } => {
            let classifier = iotguard::load_classifier(&config)?;
            let reading = FeatureVector {
                temp,
                humidity,
                message_rate: rate as f64,
            };
            let status = classifier
                .classify(std::slice::from_ref(&reading))?
                .into_iter()
                .next()
                .context("model returned no label")?;

            if json {
                let out = serde_json::json!({
                    "temp": temp,
                    "humidity": humidity,
                    "rate": rate,
                    "status": status,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("T={temp} H={humidity} R={rate} -> {status}");
            }
        }
        Commands::Stats { json } => {
            let store = RecordStore::new(&config.storage.csv_path);
            let batch = store.read_all()?;
            let summary = BatchSummary::of(&features::extract(&batch.records));

            if json {
                let out = serde_json::json!({
                    "path": store.path().display().to_string(),
                    "records": batch.total,
                    "columns": batch.columns,
                    "summary": summary,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("\n=== iotguard Telemetry Log ===");
                println!("Path:     {}", store.path().display());
                println!("Records:  {}", batch.total);
                match summary {
                    Some(s) => {
                        println!("Temp:     {}", s.temp);
                        println!("Humidity: {}", s.humidity);
                        println!("Rate:     {}", s.message_rate);
                    }
                    None => println!("(no records yet)"),
                }
                println!();
            }
        }
    }

    Ok(())
}
