use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    Database,
    Cache,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStatus {
    Active,
    Idle,
    Error,
}

/// Health and retry bookkeeping for one external dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionPool {
    pub id: String,
    pub kind: PoolKind,
    pub status: PoolStatus,
    pub last_used: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
}

impl ConnectionPool {
    pub fn new(id: &str, kind: PoolKind, max_retries: u32) -> Self {
        Self {
            id: id.to_string(),
            kind,
            status: PoolStatus::Idle,
            last_used: Utc::now(),
            retry_count: 0,
            max_retries,
            last_error: None,
        }
    }

    pub(crate) fn mark_active(&mut self) {
        self.status = PoolStatus::Active;
        self.last_used = Utc::now();
    }

    pub(crate) fn mark_success(&mut self) {
        self.status = PoolStatus::Idle;
        self.retry_count = 0;
        self.last_error = None;
    }

    pub(crate) fn mark_failure(&mut self, attempt: u32, error: String) {
        self.retry_count = attempt + 1;
        self.last_error = Some(error);
    }

    pub(crate) fn reset(&mut self) {
        self.status = PoolStatus::Idle;
        self.retry_count = 0;
        self.last_used = Utc::now();
    }
}
