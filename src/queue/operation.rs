use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Reconcile,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::Reconcile => "reconcile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OperationStatus {
    /// `processing -> pending` is only taken for retryable failures and timeout recovery.
    pub fn can_transition_to(self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed) | (Processing, Pending)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetadata {
    pub priority: Priority,
}

/// Durable record of one entity mutation and its retry state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub operation_id: String,
    #[serde(rename = "type")]
    pub kind: OperationType,
    pub entity: String,
    pub payload: Value,
    pub status: OperationStatus,
    pub retries: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub last_processed: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: OperationMetadata,
}

impl SyncOperation {
    /// A fresh row that is already owned by the caller (`processing`).
    pub fn start(request: &SyncRequest, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            operation_id: Uuid::new_v4().to_string(),
            kind: request.action,
            entity: request.entity.clone(),
            payload: request.payload.clone(),
            status: OperationStatus::Processing,
            retries: 0,
            max_retries,
            error: None,
            timestamp: now,
            last_processed: Some(now),
            completed_at: None,
            metadata: OperationMetadata {
                priority: request.priority,
            },
        }
    }

    pub fn claimed(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: OperationStatus::Processing,
            last_processed: Some(now),
            ..self.clone()
        }
    }

    pub fn completed(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: OperationStatus::Completed,
            completed_at: Some(now),
            last_processed: None,
            error: None,
            ..self.clone()
        }
    }

    /// Back to `pending` with one more retry consumed, or `failed` once the budget is spent.
    pub fn attempt_failed(&self, error: String) -> Self {
        let (status, retries) = if self.retries < self.max_retries {
            (OperationStatus::Pending, self.retries + 1)
        } else {
            (OperationStatus::Failed, self.retries)
        };
        Self {
            status,
            retries,
            error: Some(error),
            last_processed: None,
            ..self.clone()
        }
    }

    pub fn reclaimed(&self) -> Self {
        Self {
            status: OperationStatus::Pending,
            last_processed: None,
            ..self.clone()
        }
    }

    /// A `processing` row whose worker has been silent for longer than `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if self.status != OperationStatus::Processing {
            return false;
        }
        match self.last_processed {
            Some(at) => match chrono::Duration::from_std(timeout) {
                Ok(timeout) => at < now - timeout,
                Err(_) => false,
            },
            None => true,
        }
    }
}

/// What a caller asks the queue to do.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub entity: String,
    pub action: OperationType,
    pub payload: Value,
    pub priority: Priority,
}

impl SyncRequest {
    pub fn new(entity: &str, action: OperationType) -> Self {
        Self {
            entity: entity.to_string(),
            action,
            payload: Value::Null,
            priority: Priority::default(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub operation_id: String,
    pub entity: String,
    pub action: OperationType,
    pub affected_count: u64,
    pub timestamp: DateTime<Utc>,
    /// Row status after this attempt, when the row could be written.
    pub status: Option<OperationStatus>,
    pub details: Option<Value>,
    pub error: Option<String>,
}

/// Arrays count their elements, a single object counts as one, anything else as zero.
pub fn affected_count(value: &Value) -> u64 {
    match value {
        Value::Array(items) => items.len() as u64,
        Value::Object(_) => 1,
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: OperationStatus) {
        match status {
            OperationStatus::Pending => self.pending += 1,
            OperationStatus::Processing => self.processing += 1,
            OperationStatus::Completed => self.completed += 1,
            OperationStatus::Failed => self.failed += 1,
        }
    }
}
