//! Health, metric and latency bookkeeping plus the three periodic sweeps.
//!
//! All registries belong to one `MonitorService`; nothing here is global.

pub mod alerts;
pub mod benchmark;
pub mod health;
pub mod metrics;
pub mod scheduler;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::common::time::elapsed_ms;
use crate::config::MonitorConfig;
use crate::integrity::{DataIntegrityReport, IntegrityScanner, Severity};
use crate::queue::{DrainSummary, StatusCounts, SyncOperationQueue};
use crate::storage::{record_system_event, AuditSink};
use crate::verify::{IntegrationResult, IntegrationVerifier};

pub use self::alerts::{Alert, AlertKind};
pub use self::benchmark::{percentile, BenchmarkSamples, PerformanceBenchmark};
pub use self::health::{HealthBoard, HealthCheckResult, HealthStatus};
pub use self::metrics::{MetricKind, MetricStatus, MetricWindow, MonitoringMetric, Thresholds};
pub use self::scheduler::{PeriodicTask, Scheduler, TickId};

pub const HEALTH_SWEEP: &str = "health";
pub const INTEGRITY_SWEEP: &str = "integrity";
pub const QUEUE_SWEEP: &str = "sync-queue";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringDashboard {
    pub timestamp: DateTime<Utc>,
    pub overall_status: HealthStatus,
    pub health: Vec<HealthCheckResult>,
    /// Newest sample of every metric, ordered by name.
    pub metrics: Vec<MonitoringMetric>,
    pub alerts: Vec<Alert>,
    /// `None` when the operation log could not be read.
    pub queue: Option<StatusCounts>,
    pub benchmarks: Vec<PerformanceBenchmark>,
}

pub struct MonitorService {
    verifier: Arc<IntegrationVerifier>,
    queue: Arc<SyncOperationQueue>,
    integrity: Arc<IntegrityScanner>,
    audit: Arc<dyn AuditSink>,
    config: MonitorConfig,
    health: RwLock<HealthBoard>,
    metrics: RwLock<HashMap<String, MetricWindow>>,
    benchmarks: RwLock<HashMap<String, BenchmarkSamples>>,
}

impl MonitorService {
    pub fn new(
        verifier: Arc<IntegrationVerifier>,
        queue: Arc<SyncOperationQueue>,
        integrity: Arc<IntegrityScanner>,
        audit: Arc<dyn AuditSink>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            verifier,
            queue,
            integrity,
            audit,
            config,
            health: RwLock::new(HealthBoard::default()),
            metrics: RwLock::new(HashMap::new()),
            benchmarks: RwLock::new(HashMap::new()),
        }
    }

    fn thresholds(&self) -> Thresholds {
        Thresholds {
            warning: self.config.response_time_warning_ms,
            critical: self.config.response_time_critical_ms,
        }
    }

    /// Verifies integration and queue backlog, recording one result per
    /// component: `database`, `cache`, `api` and `sync`.
    pub async fn perform_health_checks(&self) -> Vec<HealthCheckResult> {
        let verification = self.verifier.verify_system_integration().await;
        let mut results = Vec::with_capacity(4);

        results.push(match &verification.details.database {
            Some(db) => self.timed_result("database", db.response_time_ms),
            None => self.unhealthy("database", &verification, "database"),
        });

        results.push(match &verification.details.cache {
            Some(cache) => self.timed_result("cache", cache.response_time_ms),
            None => self.unhealthy("cache", &verification, "cache"),
        });

        let api_status = if verification.success {
            self.latency_status(verification.duration_ms)
        } else if verification.details.database.is_some() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
        let api_message = (!verification.success).then(|| {
            format!("{} integration checks failed", verification.errors.len())
        });
        results.push(self.record_health("api", api_status, verification.duration_ms, api_message));

        let started = Instant::now();
        let sync = match self.queue.pending_depth().await {
            Ok(depth) => {
                self.record_metric("sync.pendingOperations", depth as f64, "count");
                if depth > self.config.queue_degraded_depth {
                    self.record_health(
                        "sync",
                        HealthStatus::Degraded,
                        elapsed_ms(started),
                        Some(format!("{depth} operations pending")),
                    )
                } else {
                    self.record_health("sync", HealthStatus::Healthy, elapsed_ms(started), None)
                }
            }
            Err(e) => self.record_health(
                "sync",
                HealthStatus::Unhealthy,
                elapsed_ms(started),
                Some(e.to_string()),
            ),
        };
        results.push(sync);

        for result in &results {
            self.record_metric(
                &format!("{}.responseTime", result.component),
                result.response_time_ms as f64,
                "ms",
            );
        }
        results
    }

    pub fn record_health(
        &self,
        component: &str,
        status: HealthStatus,
        response_time_ms: u64,
        message: Option<String>,
    ) -> HealthCheckResult {
        let result = self
            .health
            .write()
            .record(component, status, response_time_ms, message);
        if result.status != HealthStatus::Healthy {
            log::warn!(
                "Component '{component}' is {:?} ({} consecutive failures)",
                result.status,
                result.consecutive_failures
            );
        }
        result
    }

    fn latency_status(&self, response_time_ms: u64) -> HealthStatus {
        if response_time_ms as f64 > self.config.response_time_warning_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    fn timed_result(&self, component: &str, response_time_ms: u64) -> HealthCheckResult {
        let status = self.latency_status(response_time_ms);
        self.record_health(component, status, response_time_ms, None)
    }

    fn unhealthy(&self, component: &str, verification: &IntegrationResult, check: &str) -> HealthCheckResult {
        let message = verification
            .errors
            .iter()
            .find(|e| e.check == check)
            .map(|e| e.message.clone());
        self.record_health(component, HealthStatus::Unhealthy, verification.duration_ms, message)
    }

    pub fn health_results(&self) -> Vec<HealthCheckResult> {
        self.health.read().all()
    }

    pub fn record_metric(&self, name: &str, value: f64, unit: &str) -> MonitoringMetric {
        let kind = MetricKind::classify(name);
        let metric = MonitoringMetric {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
            timestamp: Utc::now(),
            status: self.thresholds().status(kind, value),
            kind,
        };
        if metric.status == MetricStatus::Critical {
            log::warn!("Metric {name} = {value}{unit} is critical");
        }
        self.metrics
            .write()
            .entry(name.to_string())
            .or_insert_with(|| MetricWindow::new(self.config.metric_window))
            .push(metric.clone());
        metric
    }

    pub fn metric_window(&self, name: &str) -> Option<MetricWindow> {
        self.metrics.read().get(name).cloned()
    }

    /// Conditions that hold right now: components failing repeatedly and
    /// response-time metrics whose recent mean is over the critical threshold.
    pub fn active_alerts(&self) -> Vec<Alert> {
        let now = Utc::now();
        let mut alerts = Vec::new();

        let results = self.health.read().all();
        for result in results {
            if result.consecutive_failures >= self.config.consecutive_failure_threshold {
                alerts.push(Alert {
                    kind: AlertKind::ConsecutiveFailures,
                    severity: Severity::Critical,
                    message: format!(
                        "{} failed {} consecutive health checks",
                        result.component, result.consecutive_failures
                    ),
                    source: result.component,
                    value: f64::from(result.consecutive_failures),
                    timestamp: now,
                });
            }
        }

        let metrics = self.metrics.read();
        let mut names: Vec<&String> = metrics.keys().collect();
        names.sort();
        for name in names {
            let window = &metrics[name];
            let is_response_time = window
                .latest()
                .map(|m| m.kind == MetricKind::ResponseTime)
                .unwrap_or(false);
            if !is_response_time {
                continue;
            }
            if let Some(mean) = window.recent_mean(self.config.alert_sample_window) {
                if mean > self.config.response_time_critical_ms {
                    alerts.push(Alert {
                        kind: AlertKind::SlowResponse,
                        severity: Severity::High,
                        source: name.clone(),
                        message: format!(
                            "{name} averaged {mean:.0}ms over the last {} samples",
                            self.config.alert_sample_window.min(window.len())
                        ),
                        value: mean,
                        timestamp: now,
                    });
                }
            }
        }
        alerts
    }

    /// Computes the active alerts and writes each one to the audit sink.
    pub async fn evaluate_alerts(&self) -> Vec<Alert> {
        let alerts = self.active_alerts();
        for alert in &alerts {
            log::warn!("ALERT [{:?}] {}", alert.severity, alert.message);
            record_system_event(
                self.audit.as_ref(),
                "MONITORING_ALERT",
                json!({
                    "kind": alert.kind,
                    "severity": alert.severity,
                    "source": alert.source,
                    "message": alert.message,
                    "value": alert.value,
                }),
            )
            .await;
        }
        alerts
    }

    pub fn record_benchmark(&self, operation: &str, duration_ms: f64) {
        self.benchmarks
            .write()
            .entry(operation.to_string())
            .or_insert_with(|| BenchmarkSamples::new(self.config.benchmark_window))
            .push(duration_ms);
    }

    pub fn get_performance_stats(&self, operation: &str) -> Option<PerformanceBenchmark> {
        self.benchmarks.read().get(operation)?.stats(operation)
    }

    /// Stats for every recorded operation, ordered by name.
    pub fn get_all_benchmarks(&self) -> Vec<PerformanceBenchmark> {
        let mut all: Vec<PerformanceBenchmark> = self
            .benchmarks
            .read()
            .iter()
            .filter_map(|(operation, samples)| samples.stats(operation))
            .collect();
        all.sort_by(|a, b| a.operation.cmp(&b.operation));
        all
    }

    pub async fn get_monitoring_dashboard(&self) -> MonitoringDashboard {
        let queue = match self.queue.get_sync_queue_status().await {
            Ok(status) => Some(status.counts),
            Err(e) => {
                log::warn!("Dashboard could not read sync queue: {e}");
                None
            }
        };

        let (health, overall_status) = {
            let board = self.health.read();
            (board.all(), board.overall())
        };

        let mut metrics: Vec<MonitoringMetric> = self
            .metrics
            .read()
            .values()
            .filter_map(|w| w.latest().cloned())
            .collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));

        MonitoringDashboard {
            timestamp: Utc::now(),
            overall_status,
            health,
            metrics,
            alerts: self.active_alerts(),
            queue,
            benchmarks: self.get_all_benchmarks(),
        }
    }

    /// One health tick: checks, then alert evaluation.
    pub async fn run_health_sweep(&self) -> Vec<HealthCheckResult> {
        let started = Instant::now();
        let results = self.perform_health_checks().await;
        self.evaluate_alerts().await;
        self.record_benchmark("monitor.healthSweep", elapsed_ms(started) as f64);
        results
    }

    /// One integrity tick: full scan, then auto-fix.
    pub async fn run_integrity_sweep(&self) -> anyhow::Result<DataIntegrityReport> {
        let started = Instant::now();
        let report = self.integrity.check_data_integrity().await?;
        let found = report.issues.len();
        let fixed = self.integrity.auto_fix_integrity_issues(report).await;
        self.record_benchmark("integrity.sweep", elapsed_ms(started) as f64);
        self.record_metric("integrity.openIssues", fixed.pending_count as f64, "count");
        log::info!(
            "Integrity sweep: {found} found, {} fixed, {} pending",
            fixed.fixed_count,
            fixed.pending_count
        );
        Ok(fixed)
    }

    /// One queue tick: drain a batch of pending operations.
    pub async fn run_queue_sweep(&self) -> anyhow::Result<DrainSummary> {
        let started = Instant::now();
        let summary = self.queue.process_sync_queue().await?;
        self.record_benchmark("sync.drain", elapsed_ms(started) as f64);
        Ok(summary)
    }

    /// Scheduler carrying the health, integrity and queue sweeps at their configured intervals.
    pub fn scheduler(self: &Arc<Self>) -> Scheduler {
        let every = Duration::from_secs;
        Scheduler::new()
            .with_task(Arc::new(HealthSweep {
                interval: every(self.config.health_interval_secs),
                monitor: Arc::clone(self),
            }))
            .with_task(Arc::new(IntegritySweep {
                interval: every(self.config.integrity_interval_secs),
                monitor: Arc::clone(self),
            }))
            .with_task(Arc::new(QueueSweep {
                interval: every(self.config.queue_interval_secs),
                monitor: Arc::clone(self),
            }))
    }
}

struct HealthSweep {
    interval: Duration,
    monitor: Arc<MonitorService>,
}

#[async_trait]
impl PeriodicTask for HealthSweep {
    fn name(&self) -> &str {
        HEALTH_SWEEP
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, tick: &TickId) -> anyhow::Result<()> {
        let results = self.monitor.run_health_sweep().await;
        let unhealthy = results
            .iter()
            .filter(|r| r.status == HealthStatus::Unhealthy)
            .count();
        log::info!("[{tick}] {} components checked, {unhealthy} unhealthy", results.len());
        Ok(())
    }
}

struct IntegritySweep {
    interval: Duration,
    monitor: Arc<MonitorService>,
}

#[async_trait]
impl PeriodicTask for IntegritySweep {
    fn name(&self) -> &str {
        INTEGRITY_SWEEP
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, tick: &TickId) -> anyhow::Result<()> {
        let report = self.monitor.run_integrity_sweep().await?;
        log::info!("[{tick}] {} issues pending", report.pending_count);
        Ok(())
    }
}

struct QueueSweep {
    interval: Duration,
    monitor: Arc<MonitorService>,
}

#[async_trait]
impl PeriodicTask for QueueSweep {
    fn name(&self) -> &str {
        QUEUE_SWEEP
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, tick: &TickId) -> anyhow::Result<()> {
        let summary = self.monitor.run_queue_sweep().await?;
        log::debug!("[{tick}] drained {} operations", summary.fetched);
        Ok(())
    }
}
