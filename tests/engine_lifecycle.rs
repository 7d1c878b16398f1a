use std::process::Command;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use syncwarden::config::EngineConfig;
use syncwarden::monitor::{HealthStatus, HEALTH_SWEEP, INTEGRITY_SWEEP, QUEUE_SWEEP};
use syncwarden::queue::{OperationLog, OperationStatus, SledOperationLog, SyncOperation};
use syncwarden::storage::{Filter, MemoryAuditSink, MemoryStore, Store};
use syncwarden::{OperationType, ReliabilityEngine, SyncRequest};
use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_syncwarden");

fn fast_config(tmp: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.base_delay_ms = 1;
    config.queue.data_dir = tmp.path().join("ops").to_string_lossy().into_owned();
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_recovers_and_replays_work_left_by_a_crashed_process() {
    let tmp = TempDir::new().expect("tempdir");
    let config = fast_config(&tmp);

    // Leftover from a previous process: a create that was claimed but never finished.
    let request = SyncRequest::new("classes", OperationType::Create)
        .with_payload(json!({"id": "c7", "name": "Astronomy"}));
    let orphan = SyncOperation::start(&request, 3, Utc::now() - Duration::hours(1));
    {
        let log = SledOperationLog::open(&config.queue.data_dir).expect("open log");
        log.insert(&orphan).await.expect("insert");
    }

    let store = MemoryStore::new();
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = ReliabilityEngine::builder()
        .config(config)
        .store(Arc::new(store.clone()))
        .audit(audit.clone())
        .build()
        .await
        .expect("build engine");

    let status = engine.get_sync_queue_status().await.expect("status");
    assert_eq!(status.counts.pending, 1);
    assert_eq!(status.active[0].operation_id, orphan.operation_id);

    assert_eq!(engine.scheduler().run_now(QUEUE_SWEEP).await, Some(true));

    let status = engine.get_sync_queue_status().await.expect("status");
    assert_eq!(status.counts.completed, 1);
    assert!(status.active.is_empty());
    assert_eq!(
        store.count("classes", &Filter::eq("name", "Astronomy")).await.expect("count"),
        1
    );
    assert_eq!(audit.with_action("SYNC_OPERATION_COMPLETED").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sweeps_feed_the_dashboard() {
    let tmp = TempDir::new().expect("tempdir");
    let store = MemoryStore::from_json(json!({
        "users": [{"id": "u1"}],
        "classes": [{"id": "c1", "name": "Math", "headTeacherId": "u404"}]
    }))
    .expect("fixture");
    let engine = ReliabilityEngine::builder()
        .config(fast_config(&tmp))
        .store(Arc::new(store.clone()))
        .audit(Arc::new(MemoryAuditSink::new()))
        .build()
        .await
        .expect("build engine");

    let scheduler = engine.scheduler();
    assert_eq!(scheduler.run_now(HEALTH_SWEEP).await, Some(true));
    assert_eq!(scheduler.run_now(INTEGRITY_SWEEP).await, Some(true));

    let dashboard = engine.get_monitoring_dashboard().await;
    assert_eq!(dashboard.overall_status, HealthStatus::Healthy);
    assert_eq!(dashboard.health.len(), 4);
    assert!(dashboard.alerts.is_empty());
    assert!(dashboard.metrics.iter().any(|m| m.name == "database.responseTime"));
    assert!(dashboard
        .benchmarks
        .iter()
        .any(|b| b.operation == "integrity.sweep"));

    // The integrity sweep repaired the dangling reference.
    let c1 = store
        .find("classes", &Filter::eq("id", "c1"), None)
        .await
        .expect("find");
    assert!(c1[0].get("headTeacherId").is_none());

    let pools = engine.get_connection_pool_status();
    assert!(pools.iter().all(|p| p.retry_count == 0));

    engine.start();
    engine.shutdown().await;
}

#[test]
fn scan_command_prints_and_fixes_report() {
    let tmp = TempDir::new().expect("tempdir");
    let fixture = tmp.path().join("school.json");
    std::fs::write(
        &fixture,
        json!({
            "users": [{"id": "u1"}],
            "classes": [
                {"id": "c1", "name": "Math", "headTeacherId": "u404"},
                {"id": "c2", "name": "MATH"}
            ]
        })
        .to_string(),
    )
    .expect("write fixture");

    let output = Command::new(BIN)
        .arg("scan")
        .arg("--fixture")
        .arg(&fixture)
        .arg("--fix")
        .env("SYNCWARDEN_RETRY_BASE_DELAY_MS", "1")
        .output()
        .expect("run syncwarden scan");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["fixed_count"], 1);
    assert_eq!(report["pending_count"], 1);
    assert_eq!(report["issues"][0]["type"], "duplicate_entry");
}

#[tokio::test]
async fn queue_commands_read_the_operation_log() {
    let tmp = TempDir::new().expect("tempdir");
    let data_dir = tmp.path().join("ops");
    let stale = SyncOperation::start(
        &SyncRequest::new("users", OperationType::Delete),
        3,
        Utc::now() - Duration::hours(3),
    );
    {
        let log = SledOperationLog::open(&data_dir).expect("open log");
        log.insert(&stale).await.expect("insert");
    }

    let recover = Command::new(BIN)
        .args(["queue", "recover", "--data-dir"])
        .arg(&data_dir)
        .output()
        .expect("run queue recover");
    assert!(recover.status.success());
    assert_eq!(String::from_utf8_lossy(&recover.stdout).trim(), "1");

    let status = Command::new(BIN)
        .args(["queue", "status", "--data-dir"])
        .arg(&data_dir)
        .output()
        .expect("run queue status");
    assert!(status.status.success());
    let body: Value = serde_json::from_slice(&status.stdout).expect("json status");
    assert_eq!(body["counts"]["pending"], 1);
    assert_eq!(body["active"][0]["status"], json!(OperationStatus::Pending));
}
