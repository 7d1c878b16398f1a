//! Collaborator interfaces the engine is written against.
//!
//! The record store, the side cache and the audit log all live outside this
//! crate. The engine only sees them through the traits below; `memory`
//! provides in-process implementations used by the binary and the tests.

mod error;
pub mod audit;
pub mod memory;
pub mod query;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use self::audit::{
    record_system_event, AuditRecord, LogAuditSink, MemoryAuditSink, SYSTEM_ACTOR_ID,
    SYSTEM_ACTOR_NAME,
};
pub use self::error::StoreError;
pub use self::memory::{MemoryCache, MemoryStore};
pub use self::query::{document_id, Aggregation, Document, Filter, Update, ID_FIELD};

/// Snapshot returned by the store's server-status command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub collections: usize,
}

/// Document-oriented record store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn server_status(&self) -> Result<ServerStatus, StoreError>;

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn insert(&self, collection: &str, doc: Document) -> Result<(), StoreError>;

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        updates: &[Update],
    ) -> Result<u64, StoreError>;

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn aggregate(
        &self,
        collection: &str,
        aggregation: &Aggregation,
    ) -> Result<Vec<Document>, StoreError>;

    /// Opens a transaction. Nothing written through it is visible until `commit`.
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}

/// A scoped unit of writes: begin, run, then commit or rollback.
#[async_trait]
pub trait Transaction: Send {
    async fn insert(&mut self, collection: &str, doc: Document) -> Result<(), StoreError>;

    async fn update_many(
        &mut self,
        collection: &str,
        filter: &Filter,
        updates: &[Update],
    ) -> Result<u64, StoreError>;

    async fn delete_many(&mut self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Key/value side cache with TTLs and glob invalidation.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError>;

    /// Removes every key matching `pattern` (`*` and `?` wildcards). Returns the count removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError>;
}

/// Append-only audit log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn create(
        &self,
        action: &str,
        details: Value,
        actor_id: &str,
        actor_name: &str,
    ) -> Result<(), StoreError>;
}
