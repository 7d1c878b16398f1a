use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AuditSink, StoreError};

pub const SYSTEM_ACTOR_ID: &str = "system";
pub const SYSTEM_ACTOR_NAME: &str = "Sync Warden";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: String,
    pub details: Value,
    pub actor_id: String,
    pub actor_name: String,
    pub created_at: DateTime<Utc>,
}

/// Keeps audit records in memory, in arrival order.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn with_action(&self, action: &str) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.action == action)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn create(
        &self,
        action: &str,
        details: Value,
        actor_id: &str,
        actor_name: &str,
    ) -> Result<(), StoreError> {
        self.records.lock().push(AuditRecord {
            action: action.to_string(),
            details,
            actor_id: actor_id.to_string(),
            actor_name: actor_name.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }
}

/// Writes audit records to the `audit` log target.
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn create(
        &self,
        action: &str,
        details: Value,
        actor_id: &str,
        actor_name: &str,
    ) -> Result<(), StoreError> {
        log::info!(
            target: "audit",
            "{action} by {actor_name} ({actor_id}): {}",
            serde_json::to_string(&details)?
        );
        Ok(())
    }
}

/// Records an audit entry as the engine itself. Failures are logged, never returned.
pub async fn record_system_event(sink: &dyn AuditSink, action: &str, details: Value) {
    if let Err(e) = sink
        .create(action, details, SYSTEM_ACTOR_ID, SYSTEM_ACTOR_NAME)
        .await
    {
        log::warn!("Failed to write audit record '{action}': {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn system_events_are_attributed_to_the_engine() {
        let sink = MemoryAuditSink::new();
        record_system_event(&sink, "PROBE", json!({"ok": true})).await;

        let records = sink.with_action("PROBE");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].actor_id, SYSTEM_ACTOR_ID);
        assert_eq!(records[0].details["ok"], json!(true));
    }
}
