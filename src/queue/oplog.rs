use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::error::QueueError;
use super::operation::{OperationStatus, StatusCounts, SyncOperation};

/// Durable home of `SyncOperation` rows.
///
/// Every status change goes through `compare_and_set`, which writes `next`
/// only if the stored row still has status `expected`. Losing that race is
/// reported as `Ok(false)`, not as an error.
#[async_trait]
pub trait OperationLog: Send + Sync {
    /// Inserts a new row; fails with `Duplicate` if the id is already present.
    async fn insert(&self, op: &SyncOperation) -> Result<(), QueueError>;

    async fn get(&self, operation_id: &str) -> Result<Option<SyncOperation>, QueueError>;

    async fn compare_and_set(
        &self,
        expected: OperationStatus,
        next: &SyncOperation,
    ) -> Result<bool, QueueError>;

    /// Rows with `status`, oldest `timestamp` first.
    async fn list_by_status(
        &self,
        status: OperationStatus,
        limit: Option<usize>,
    ) -> Result<Vec<SyncOperation>, QueueError>;

    async fn counts(&self) -> Result<StatusCounts, QueueError>;
}

pub(crate) fn oldest_first(mut rows: Vec<SyncOperation>, limit: Option<usize>) -> Vec<SyncOperation> {
    rows.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.operation_id.cmp(&b.operation_id))
    });
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    rows
}

/// Operation log held in process memory.
#[derive(Default)]
pub struct MemoryOperationLog {
    rows: Mutex<HashMap<String, SyncOperation>>,
}

impl MemoryOperationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperationLog for MemoryOperationLog {
    async fn insert(&self, op: &SyncOperation) -> Result<(), QueueError> {
        let mut rows = self.rows.lock();
        if rows.contains_key(&op.operation_id) {
            return Err(QueueError::Duplicate(op.operation_id.clone()));
        }
        rows.insert(op.operation_id.clone(), op.clone());
        Ok(())
    }

    async fn get(&self, operation_id: &str) -> Result<Option<SyncOperation>, QueueError> {
        Ok(self.rows.lock().get(operation_id).cloned())
    }

    async fn compare_and_set(
        &self,
        expected: OperationStatus,
        next: &SyncOperation,
    ) -> Result<bool, QueueError> {
        let mut rows = self.rows.lock();
        let current = rows
            .get_mut(&next.operation_id)
            .ok_or_else(|| QueueError::NotFound(next.operation_id.clone()))?;
        if current.status != expected {
            return Ok(false);
        }
        *current = next.clone();
        Ok(true)
    }

    async fn list_by_status(
        &self,
        status: OperationStatus,
        limit: Option<usize>,
    ) -> Result<Vec<SyncOperation>, QueueError> {
        let rows: Vec<SyncOperation> = self
            .rows
            .lock()
            .values()
            .filter(|row| row.status == status)
            .cloned()
            .collect();
        Ok(oldest_first(rows, limit))
    }

    async fn counts(&self) -> Result<StatusCounts, QueueError> {
        let mut counts = StatusCounts::default();
        for row in self.rows.lock().values() {
            counts.add(row.status);
        }
        Ok(counts)
    }
}
