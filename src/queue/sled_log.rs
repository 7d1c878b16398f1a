use std::path::Path;

use async_trait::async_trait;

use super::error::QueueError;
use super::oplog::{oldest_first, OperationLog};
use super::operation::{OperationStatus, StatusCounts, SyncOperation};

/// Operation log backed by a dedicated sled tree.
///
/// Rows are keyed by operation id and stored as JSON. Conditional writes use
/// sled's `compare_and_swap` against the exact bytes that were read, so a
/// concurrent writer can never be overwritten blindly. Every write is flushed
/// before the call returns.
pub struct SledOperationLog {
    tree: sled::Tree,
}

impl SledOperationLog {
    const TREE_NAME: &'static str = "__sync_operations__";

    /// Opens (or creates) a sled database at `path` and the operations tree inside it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let db = sled::open(path)?;
        log::info!("Sync operation log opened at {:?}", path);
        Self::new(&db)
    }

    pub fn new(db: &sled::Db) -> Result<Self, QueueError> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree })
    }

    fn decode(bytes: &[u8]) -> Result<SyncOperation, QueueError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn scan(&self) -> Result<Vec<SyncOperation>, QueueError> {
        let mut rows = Vec::new();
        for item in self.tree.iter() {
            let (_key, value) = item?;
            rows.push(Self::decode(&value)?);
        }
        Ok(rows)
    }
}

#[async_trait]
impl OperationLog for SledOperationLog {
    async fn insert(&self, op: &SyncOperation) -> Result<(), QueueError> {
        let bytes = serde_json::to_vec(op)?;
        let swapped = self
            .tree
            .compare_and_swap(op.operation_id.as_bytes(), None::<&[u8]>, Some(bytes))?;
        if swapped.is_err() {
            return Err(QueueError::Duplicate(op.operation_id.clone()));
        }
        self.tree.flush_async().await?;
        Ok(())
    }

    async fn get(&self, operation_id: &str) -> Result<Option<SyncOperation>, QueueError> {
        match self.tree.get(operation_id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn compare_and_set(
        &self,
        expected: OperationStatus,
        next: &SyncOperation,
    ) -> Result<bool, QueueError> {
        let key = next.operation_id.as_bytes();
        let encoded = serde_json::to_vec(next)?;

        loop {
            let current = self
                .tree
                .get(key)?
                .ok_or_else(|| QueueError::NotFound(next.operation_id.clone()))?;
            if Self::decode(&current)?.status != expected {
                return Ok(false);
            }

            match self
                .tree
                .compare_and_swap(key, Some(current), Some(encoded.clone()))?
            {
                Ok(()) => {
                    self.tree.flush_async().await?;
                    return Ok(true);
                }
                // The row changed between read and swap; re-check its status.
                Err(_) => continue,
            }
        }
    }

    async fn list_by_status(
        &self,
        status: OperationStatus,
        limit: Option<usize>,
    ) -> Result<Vec<SyncOperation>, QueueError> {
        let rows = self
            .scan()?
            .into_iter()
            .filter(|row| row.status == status)
            .collect();
        Ok(oldest_first(rows, limit))
    }

    async fn counts(&self) -> Result<StatusCounts, QueueError> {
        let mut counts = StatusCounts::default();
        for row in self.scan()? {
            counts.add(row.status);
        }
        Ok(counts)
    }
}
