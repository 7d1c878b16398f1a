//! Durable queue of entity mutations with a status state machine.
//!
//! Rows move `pending -> processing -> {completed, failed}`; a failed attempt
//! with retries left goes back to `pending`, and startup recovery returns rows
//! abandoned in `processing` to `pending`. Every transition is a conditional
//! write on the row's current status, so two workers draining the same log
//! never both own a row.

mod error;
pub mod oplog;
pub mod operation;
pub mod replay;
pub mod sled_log;

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::QueueConfig;
use crate::storage::{record_system_event, AuditSink, Cache};

pub use self::error::QueueError;
pub use self::oplog::{MemoryOperationLog, OperationLog};
pub use self::operation::{
    affected_count, OperationMetadata, OperationStatus, OperationType, Priority, StatusCounts,
    SyncOperation, SyncRequest, SyncResult,
};
pub use self::replay::{OperationReplay, ReplayRegistry, StoreReplay};
pub use self::sled_log::SledOperationLog;

/// Cache key patterns that go stale when `entity` changes.
pub fn cache_patterns(entity: &str) -> Vec<String> {
    let patterns: &[&str] = match entity {
        "users" => &["users:*", "user:*", "dashboard:*"],
        "classes" => &["classes:*", "class:*", "dashboard:*"],
        "students" => &["students:*", "student:*", "classes:*"],
        "grades" => &["grades:*", "students:*"],
        _ => return vec![format!("{entity}:*")],
    };
    patterns.iter().map(|p| p.to_string()).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainSummary {
    pub fetched: usize,
    pub completed: usize,
    pub requeued: usize,
    pub failed: usize,
    /// Rows another worker claimed first.
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueStatus {
    pub counts: StatusCounts,
    /// Pending rows then processing rows, each oldest first.
    pub active: Vec<SyncOperation>,
    pub timestamp: chrono::DateTime<Utc>,
}

pub struct SyncOperationQueue {
    log: Arc<dyn OperationLog>,
    cache: Arc<dyn Cache>,
    audit: Arc<dyn AuditSink>,
    replay: ReplayRegistry,
    config: QueueConfig,
}

impl SyncOperationQueue {
    pub fn new(
        log: Arc<dyn OperationLog>,
        cache: Arc<dyn Cache>,
        audit: Arc<dyn AuditSink>,
        replay: ReplayRegistry,
        config: QueueConfig,
    ) -> Self {
        Self {
            log,
            cache,
            audit,
            replay,
            config,
        }
    }

    /// Builds the queue and reclaims rows abandoned by a crashed worker.
    pub async fn open(
        log: Arc<dyn OperationLog>,
        cache: Arc<dyn Cache>,
        audit: Arc<dyn AuditSink>,
        replay: ReplayRegistry,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        let queue = Self::new(log, cache, audit, replay, config);
        queue.recover_stale_operations().await?;
        Ok(queue)
    }

    pub fn operation_log(&self) -> Arc<dyn OperationLog> {
        Arc::clone(&self.log)
    }

    /// Returns `processing` rows older than the processing timeout to `pending`.
    /// Running it again without new stale rows changes nothing.
    pub async fn recover_stale_operations(&self) -> Result<usize, QueueError> {
        let now = Utc::now();
        let timeout = self.config.processing_timeout();
        let mut recovered = 0;

        for row in self
            .log
            .list_by_status(OperationStatus::Processing, None)
            .await?
        {
            if !row.is_stale(now, timeout) {
                continue;
            }
            if self.transition(&row, &row.reclaimed()).await? {
                recovered += 1;
                log::warn!(
                    "Recovered stale sync operation {} ({} on '{}', last processed {:?})",
                    row.operation_id,
                    row.kind.as_str(),
                    row.entity,
                    row.last_processed
                );
            }
        }

        if recovered > 0 {
            log::info!("Startup recovery returned {recovered} operations to pending");
        }
        Ok(recovered)
    }

    /// Records the request as a `processing` row, runs `work`, and settles the row.
    ///
    /// Never fails: every outcome, including a failure to record the row, is
    /// reported through the returned `SyncResult`.
    pub async fn execute_sync_operation<F, Fut>(&self, request: SyncRequest, work: F) -> SyncResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        let row = SyncOperation::start(&request, self.config.max_retries, Utc::now());

        if let Err(e) = self.log.insert(&row).await {
            log::error!(
                "Could not record sync operation for '{}': {e}",
                request.entity
            );
            return SyncResult {
                success: false,
                operation_id: row.operation_id,
                entity: request.entity,
                action: request.action,
                affected_count: 0,
                timestamp: Utc::now(),
                status: None,
                details: None,
                error: Some(e.to_string()),
            };
        }

        let outcome = work().await;
        self.settle(row, outcome).await
    }

    /// Drains up to `batch_size` of the oldest pending rows.
    pub async fn process_sync_queue(&self) -> Result<DrainSummary, QueueError> {
        let batch = self
            .log
            .list_by_status(OperationStatus::Pending, Some(self.config.batch_size))
            .await?;
        let mut summary = DrainSummary {
            fetched: batch.len(),
            ..DrainSummary::default()
        };

        for row in batch {
            let claimed = row.claimed(Utc::now());
            match self.transition(&row, &claimed).await {
                Ok(true) => {}
                Ok(false) => {
                    log::debug!("Sync operation {} already claimed", row.operation_id);
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    log::error!("Failed to claim sync operation {}: {e}", row.operation_id);
                    summary.errors += 1;
                    continue;
                }
            }

            let outcome = match self.replay.resolve(&claimed.entity) {
                Some(handler) => handler.replay(&claimed).await,
                None => Err(anyhow::anyhow!(
                    "no replay handler registered for entity '{}'",
                    claimed.entity
                )),
            };

            let result = self.settle(claimed, outcome).await;
            match result.status {
                Some(OperationStatus::Completed) => summary.completed += 1,
                Some(OperationStatus::Pending) => summary.requeued += 1,
                Some(OperationStatus::Failed) => summary.failed += 1,
                _ => summary.errors += 1,
            }
        }

        if summary.fetched > 0 {
            log::info!(
                "Sync queue drain: fetched={} completed={} requeued={} failed={} skipped={} errors={}",
                summary.fetched,
                summary.completed,
                summary.requeued,
                summary.failed,
                summary.skipped,
                summary.errors
            );
        }
        Ok(summary)
    }

    pub async fn get_sync_queue_status(&self) -> Result<SyncQueueStatus, QueueError> {
        let counts = self.log.counts().await?;
        let mut active = self
            .log
            .list_by_status(OperationStatus::Pending, None)
            .await?;
        active.extend(
            self.log
                .list_by_status(OperationStatus::Processing, None)
                .await?,
        );
        Ok(SyncQueueStatus {
            counts,
            active,
            timestamp: Utc::now(),
        })
    }

    pub async fn pending_depth(&self) -> Result<u64, QueueError> {
        Ok(self.log.counts().await?.pending)
    }

    async fn transition(
        &self,
        current: &SyncOperation,
        next: &SyncOperation,
    ) -> Result<bool, QueueError> {
        if !current.status.can_transition_to(next.status) {
            return Err(QueueError::InvalidTransition {
                from: current.status,
                to: next.status,
            });
        }
        self.log.compare_and_set(current.status, next).await
    }

    /// Resolves a `processing` row from the outcome of its unit of work.
    ///
    /// Audit records follow the status write: an outcome that another worker
    /// overtook is reported as unsuccessful and leaves no audit trail.
    async fn settle(&self, row: SyncOperation, outcome: anyhow::Result<Value>) -> SyncResult {
        let now = Utc::now();
        let (next, affected, details, mut error) = match outcome {
            Ok(value) => {
                let affected = affected_count(&value);
                let invalidated = self.invalidate_cache(&row.entity).await;
                let details = json!({ "invalidatedPatterns": invalidated, "result": value });
                (row.completed(now), affected, Some(details), None)
            }
            Err(e) => {
                let message = format!("{e:#}");
                (row.attempt_failed(message.clone()), 0, None, Some(message))
            }
        };

        let status = match self.transition(&row, &next).await {
            Ok(true) => Some(next.status),
            Ok(false) => {
                log::warn!(
                    "Sync operation {} changed underneath this worker; outcome not recorded",
                    row.operation_id
                );
                if error.is_none() {
                    error = Some("outcome not recorded: operation was reclaimed".to_string());
                }
                None
            }
            Err(e) => {
                log::error!("Failed to record outcome of sync operation {}: {e}", row.operation_id);
                if error.is_none() {
                    error = Some(format!("outcome not recorded: {e}"));
                }
                None
            }
        };

        match status {
            Some(OperationStatus::Completed) => {
                record_system_event(
                    self.audit.as_ref(),
                    "SYNC_OPERATION_COMPLETED",
                    json!({
                        "operationId": row.operation_id,
                        "entity": row.entity,
                        "action": row.kind,
                        "affectedCount": affected,
                        "retries": row.retries,
                    }),
                )
                .await;
            }
            Some(OperationStatus::Failed) => {
                let message = next.error.clone().unwrap_or_default();
                log::error!(
                    "Sync operation {} on '{}' failed permanently after {} retries: {message}",
                    row.operation_id,
                    row.entity,
                    next.retries
                );
                record_system_event(
                    self.audit.as_ref(),
                    "SYNC_OPERATION_FAILED",
                    json!({
                        "operationId": row.operation_id,
                        "entity": row.entity,
                        "action": row.kind,
                        "retries": next.retries,
                        "error": message,
                    }),
                )
                .await;
            }
            Some(OperationStatus::Pending) => {
                log::warn!(
                    "Sync operation {} on '{}' failed (retry {}/{}): {}",
                    row.operation_id,
                    row.entity,
                    next.retries,
                    next.max_retries,
                    next.error.as_deref().unwrap_or_default()
                );
            }
            _ => {}
        }

        SyncResult {
            success: status.is_some() && error.is_none(),
            operation_id: row.operation_id,
            entity: row.entity,
            action: row.kind,
            affected_count: affected,
            timestamp: now,
            status,
            details,
            error,
        }
    }

    /// Cache invalidation is best effort; a failure is logged and the operation still counts.
    async fn invalidate_cache(&self, entity: &str) -> Vec<String> {
        let patterns = cache_patterns(entity);
        for pattern in &patterns {
            if let Err(e) = self.cache.delete_pattern(pattern).await {
                log::warn!("Cache invalidation of '{pattern}' failed: {e}");
            }
        }
        patterns
    }
}
