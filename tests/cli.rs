//! End-to-end tests of the `rpsync` binary against the mock API.

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use serde_json::Value;
use tempfile::TempDir;

use common::{launch, MockServer, TOKEN};

fn rpsync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rpsync");
    path
}

fn setup(server: &MockServer) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("config")).unwrap();

    let config = format!(
        r#"[api]
base_url = "{}"
token = "{}"
default_project = "demo"

[sync]
batch_size = 2
requests_per_second = 100
max_retries = 2
retry_base_delay_ms = 10
retry_max_delay_ms = 20

[embedding]
provider = "hash"
dims = 64
batch_size = 4

[db]
path = "{}/data/rpsync.sqlite"

[logging]
level = "warn"
"#,
        server.base_url(),
        TOKEN,
        root.display()
    );
    let config_path = root.join("config/rpsync.toml");
    fs::write(&config_path, config).unwrap();
    (tmp, config_path)
}

async fn run(config_path: &Path, args: &[&str]) -> (String, String, i32) {
    let binary = rpsync_binary();
    let output = tokio::process::Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .arg("--progress")
        .arg("off")
        .args(args)
        .env_remove("RP_API_TOKEN")
        .env_remove("RUST_LOG")
        .output()
        .await
        .unwrap_or_else(|e| panic!("Failed to run rpsync binary at {:?}: {}", binary, e));

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

fn seed(server: &MockServer) {
    let base = (Utc::now() - Duration::days(1)).timestamp_millis();
    server.state.set(
        "demo/launch",
        (1..=5).map(|i| launch(i, base + i as i64)).collect(),
    );
    server.state.set(
        "demo/log",
        vec![serde_json::json!({
            "id": 40,
            "message": "TimeoutException while waiting for payment page",
            "level": "ERROR",
            "itemName": "pay with card",
            "lastModified": base,
        })],
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn init_sync_status_search_get() {
    let server = MockServer::start().await;
    seed(&server);
    let (_tmp, config) = setup(&server);

    let (stdout, stderr, code) = run(&config, &["init"]).await;
    assert_eq!(code, 0, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized"));

    let (stdout, stderr, code) = run(
        &config,
        &["sync", "run", "--full", "--entity-type", "launch", "--entity-type", "log", "--json"],
    )
    .await;
    assert_eq!(code, 0, "sync failed: {}", stderr);
    let report: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["state"], "completed");
    assert_eq!(report["units"].as_array().unwrap().len(), 2);
    assert_eq!(report["units"][0]["stats"]["upserted"], 5);
    assert_eq!(report["units"][1]["stats"]["upserted"], 1);

    let (stdout, _, code) = run(&config, &["sync", "status", "--json"]).await;
    assert_eq!(code, 0);
    let status: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(status["checkpoints"].as_array().unwrap().len(), 2);
    assert_eq!(status["records"].as_array().unwrap().len(), 2);

    let (stdout, _, code) = run(
        &config,
        &["storage", "search", "payment timeout", "--entity-type", "log", "--json"],
    )
    .await;
    assert_eq!(code, 0);
    let hits: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(hits[0]["record_id"], "log:40");

    let (stdout, _, code) = run(&config, &["storage", "get", "launch:3"]).await;
    assert_eq!(code, 0);
    assert!(stdout.contains("nightly regression 3"));

    let (_, _, code) = run(&config, &["storage", "get", "launch:404"]).await;
    assert_ne!(code, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_failure_exits_with_two() {
    let server = MockServer::start().await;
    seed(&server);
    let (_tmp, config) = setup(&server);

    let (stdout, stderr, code) = run(
        &config,
        &["sync", "run", "--entity-type", "launch", "--entity-type", "dashboard"],
    )
    .await;
    assert_eq!(code, 2, "stdout: {}\nstderr: {}", stdout, stderr);
    assert!(stdout.contains("launch"));
    assert!(stdout.contains("404"));
}

#[tokio::test(flavor = "multi_thread")]
async fn storage_clear_requires_confirmation() {
    let server = MockServer::start().await;
    seed(&server);
    let (_tmp, config) = setup(&server);

    let (_, stderr, code) = run(&config, &["sync", "run", "--entity-type", "launch"]).await;
    assert_eq!(code, 0, "{}", stderr);

    let (_, _, code) = run(&config, &["storage", "clear"]).await;
    assert_ne!(code, 0);

    let (stdout, _, code) = run(&config, &["storage", "clear", "--yes"]).await;
    assert_eq!(code, 0);
    assert!(stdout.contains("Removed 5 records"));
}

#[tokio::test(flavor = "multi_thread")]
async fn config_show_masks_token() {
    let server = MockServer::start().await;
    let (_tmp, config) = setup(&server);

    let (stdout, _, code) = run(&config, &["config", "show"]).await;
    assert_eq!(code, 0);
    assert!(stdout.contains("********"));
    assert!(!stdout.contains(TOKEN));
    assert!(stdout.contains("provider = \"hash\""));
}
