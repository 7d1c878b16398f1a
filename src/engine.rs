use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::config::{ConfigError, EngineConfig};
use crate::integrity::{DataIntegrityReport, FixRegistry, IntegrityError, IntegrityScanner};
use crate::monitor::{MonitorService, MonitoringDashboard, PerformanceBenchmark, Scheduler};
use crate::queue::{
    OperationLog, QueueError, ReplayRegistry, SledOperationLog, StoreReplay, SyncOperationQueue,
    SyncQueueStatus, SyncRequest, SyncResult, DrainSummary,
};
use crate::retry::{ConnectionPool, RetryExecutor};
use crate::storage::{AuditSink, Cache, LogAuditSink, MemoryCache, MemoryStore, Store};
use crate::verify::{IntegrationResult, IntegrationVerifier};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),
}

/// In-process reliability engine: verification, the sync queue, integrity
/// repair and monitoring wired to one set of collaborators.
///
/// The engine is a library component; the CRUD layer in front of it calls
/// these operations directly.
pub struct ReliabilityEngine {
    config: EngineConfig,
    retry: Arc<RetryExecutor>,
    verifier: Arc<IntegrationVerifier>,
    queue: Arc<SyncOperationQueue>,
    integrity: Arc<IntegrityScanner>,
    monitor: Arc<MonitorService>,
    scheduler: Scheduler,
}

impl ReliabilityEngine {
    pub fn builder() -> ReliabilityEngineBuilder {
        ReliabilityEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn verify_system_integration(&self) -> IntegrationResult {
        self.verifier.verify_system_integration().await
    }

    pub fn get_connection_pool_status(&self) -> Vec<ConnectionPool> {
        self.retry.pool_status()
    }

    pub fn reset_connection_pool(&self, pool_id: &str) {
        self.retry.reset_pool(pool_id)
    }

    pub async fn check_data_integrity(&self) -> Result<DataIntegrityReport, EngineError> {
        Ok(self.integrity.check_data_integrity().await?)
    }

    pub async fn auto_fix_integrity_issues(&self, report: DataIntegrityReport) -> DataIntegrityReport {
        self.integrity.auto_fix_integrity_issues(report).await
    }

    pub async fn get_sync_queue_status(&self) -> Result<SyncQueueStatus, EngineError> {
        Ok(self.queue.get_sync_queue_status().await?)
    }

    pub async fn process_sync_queue(&self) -> Result<DrainSummary, EngineError> {
        Ok(self.queue.process_sync_queue().await?)
    }

    pub async fn execute_sync_operation<F, Fut>(&self, request: SyncRequest, work: F) -> SyncResult
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<Value>>,
    {
        self.queue.execute_sync_operation(request, work).await
    }

    pub async fn get_monitoring_dashboard(&self) -> MonitoringDashboard {
        self.monitor.get_monitoring_dashboard().await
    }

    pub fn get_all_benchmarks(&self) -> Vec<PerformanceBenchmark> {
        self.monitor.get_all_benchmarks()
    }

    pub fn record_benchmark(&self, operation: &str, duration_ms: f64) {
        self.monitor.record_benchmark(operation, duration_ms)
    }

    pub fn monitor(&self) -> &Arc<MonitorService> {
        &self.monitor
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Starts the health, integrity and queue sweeps.
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Stops the sweeps, letting any tick in flight finish.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
    }
}

#[derive(Default)]
pub struct ReliabilityEngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn Store>>,
    cache: Option<Arc<dyn Cache>>,
    audit: Option<Arc<dyn AuditSink>>,
    operation_log: Option<Arc<dyn OperationLog>>,
    replay: Option<ReplayRegistry>,
    fixers: Option<FixRegistry>,
}

impl ReliabilityEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn operation_log(mut self, log: Arc<dyn OperationLog>) -> Self {
        self.operation_log = Some(log);
        self
    }

    pub fn replay(mut self, replay: ReplayRegistry) -> Self {
        self.replay = Some(replay);
        self
    }

    pub fn fixers(mut self, fixers: FixRegistry) -> Self {
        self.fixers = Some(fixers);
        self
    }

    /// Validates the config, fills unset collaborators with the in-memory
    /// store and cache, the log audit sink and a sled operation log under
    /// `queue.data_dir`, then runs startup recovery.
    pub async fn build(self) -> Result<ReliabilityEngine, EngineError> {
        let config = self.config;
        config.validate()?;

        let store: Arc<dyn Store> = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let cache: Arc<dyn Cache> = self.cache.unwrap_or_else(|| Arc::new(MemoryCache::new()));
        let audit: Arc<dyn AuditSink> = self.audit.unwrap_or_else(|| Arc::new(LogAuditSink));
        let operation_log: Arc<dyn OperationLog> = match self.operation_log {
            Some(log) => log,
            None => Arc::new(SledOperationLog::open(&config.queue.data_dir)?),
        };
        let replay = self.replay.unwrap_or_else(|| {
            ReplayRegistry::new().with_fallback(Arc::new(StoreReplay::new(Arc::clone(&store))))
        });

        let retry = Arc::new(RetryExecutor::new(&config.retry));
        let verifier = Arc::new(IntegrationVerifier::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&audit),
            Arc::clone(&retry),
            config.verify.clone(),
        ));
        let queue = Arc::new(
            SyncOperationQueue::open(
                operation_log,
                Arc::clone(&cache),
                Arc::clone(&audit),
                replay,
                config.queue.clone(),
            )
            .await?,
        );
        let mut scanner = IntegrityScanner::new(
            Arc::clone(&store),
            Arc::clone(&retry),
            Arc::clone(&audit),
            config.integrity.clone(),
        );
        if let Some(fixers) = self.fixers {
            scanner = scanner.with_fixers(fixers);
        }
        let integrity = Arc::new(scanner);
        let monitor = Arc::new(MonitorService::new(
            Arc::clone(&verifier),
            Arc::clone(&queue),
            Arc::clone(&integrity),
            audit,
            config.monitor.clone(),
        ));
        let scheduler = monitor.scheduler();

        log::info!(
            "Reliability engine ready: {} pools, {} tracked collections",
            retry.pool_status().len(),
            config.verify.tracked_collections.len()
        );

        Ok(ReliabilityEngine {
            config,
            retry,
            verifier,
            queue,
            integrity,
            monitor,
            scheduler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::OperationType;
    use serde_json::json;

    fn fast_config(dir: &std::path::Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.retry.base_delay_ms = 1;
        config.queue.data_dir = dir.to_string_lossy().into_owned();
        config
    }

    #[tokio::test]
    async fn builds_with_sled_log_and_runs_every_operation() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::from_json(json!({
            "users": [{"id": "u1"}],
            "classes": [{"id": "c1", "name": "Math", "headTeacherId": "u404"}]
        }))
        .unwrap());

        let engine = ReliabilityEngine::builder()
            .config(fast_config(dir.path()))
            .store(store)
            .build()
            .await
            .unwrap();

        assert!(engine.verify_system_integration().await.success);
        assert_eq!(engine.get_connection_pool_status().len(), 4);

        let report = engine.check_data_integrity().await.unwrap();
        assert_eq!(report.issues.len(), 1);
        let fixed = engine.auto_fix_integrity_issues(report).await;
        assert_eq!(fixed.fixed_count, 1);

        let result = engine
            .execute_sync_operation(SyncRequest::new("users", OperationType::Update), || async {
                Ok(json!({"id": "u1"}))
            })
            .await;
        assert!(result.success);
        assert_eq!(engine.get_sync_queue_status().await.unwrap().counts.completed, 1);

        engine.record_benchmark("users.update", 4.0);
        assert_eq!(engine.get_all_benchmarks().len(), 1);
        let dashboard = engine.get_monitoring_dashboard().await;
        assert_eq!(dashboard.queue.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = fast_config(dir.path());
        config.monitor.health_interval_secs = 0;
        let err = ReliabilityEngine::builder().config(config).build().await;
        assert!(matches!(err, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn start_and_shutdown_toggle_the_scheduler() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = ReliabilityEngine::builder()
            .config(fast_config(dir.path()))
            .build()
            .await
            .unwrap();
        engine.start();
        assert!(engine.scheduler().is_running());
        engine.shutdown().await;
        assert!(!engine.scheduler().is_running());
    }
}
