//! Smoke tests -- verify the binary runs and key subcommands work.

use assert_cmd::Command;
use std::path::{Path, PathBuf};

fn shipped_model() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("model/anomaly_model.json")
}

/// Write a config pointing at the shipped model and a log inside `dir`.
fn config_in(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("iotguard.toml");
    let body = format!(
        "[model]\npath = {:?}\n\n[storage]\ncsv_path = {:?}\n\n[logging]\nlevel = \"warn\"\n",
        shipped_model().display().to_string(),
        dir.path().join("sensor_log.csv").display().to_string(),
    );
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("iotguard")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Anomaly-detection layer"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("iotguard")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("iotguard"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["serve", "collect", "monitor", "classify", "stats"] {
        Command::cargo_bin("iotguard")
            .unwrap()
            .args([sub, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_classify_normal_reading() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("iotguard")
        .unwrap()
        .arg("--config")
        .arg(config_in(&dir))
        .args(["classify", "--temp", "27.5", "--humidity", "55", "--rate", "5"])
        .assert()
        .success()
        .stdout(predicates::str::contains("normal"));
}

#[test]
fn test_classify_json_flags_anomaly() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::cargo_bin("iotguard")
        .unwrap()
        .arg("--config")
        .arg(config_in(&dir))
        .args(["classify", "--temp", "90", "--humidity", "10", "--rate", "180", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["status"], "anomaly");
    assert_eq!(value["rate"], 180);
}

#[test]
fn test_classify_without_model_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("iotguard.toml");
    std::fs::write(&config, "[model]\npath = \"/nonexistent/model.json\"\n").unwrap();
    Command::cargo_bin("iotguard")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["classify", "--temp", "20", "--humidity", "50", "--rate", "1"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("failed to load model"));
}

#[test]
fn test_stats_on_missing_log_fails() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("iotguard")
        .unwrap()
        .arg("--config")
        .arg(config_in(&dir))
        .arg("stats")
        .assert()
        .failure();
}

#[test]
fn test_stats_reports_records() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("sensor_log.csv"),
        "timestamp,client_id,topic,payload_size,temp,humidity,message_rate\n\
         1,a,iot/a,40,20.0,40.0,3\n\
         2,b,iot/b,41,30.0,60.0,9\n",
    )
    .unwrap();
    Command::cargo_bin("iotguard")
        .unwrap()
        .arg("--config")
        .arg(config_in(&dir))
        .arg("stats")
        .assert()
        .success()
        .stdout(predicates::str::contains("Records:  2"))
        .stdout(predicates::str::contains("[20.0-30.0]"));
}
