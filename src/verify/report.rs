use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::ServerStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseCheck {
    pub server: ServerStatus,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheCheck {
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionCheck {
    pub accessible: bool,
    pub count: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityCheck {
    pub probe_id: String,
    pub round_trip_ms: u64,
    pub transactional: bool,
}

/// Per-check results; a check that failed leaves its slot empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationDetails {
    pub database: Option<DatabaseCheck>,
    pub cache: Option<CacheCheck>,
    pub collections: BTreeMap<String, CollectionCheck>,
    pub connectivity: Option<ConnectivityCheck>,
}

impl IntegrationDetails {
    /// Number of checks that produced a result.
    pub fn component_count(&self) -> usize {
        [
            self.database.is_some(),
            self.cache.is_some(),
            !self.collections.is_empty(),
            self.connectivity.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckFailure {
    pub check: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationResult {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub details: IntegrationDetails,
    pub errors: Vec<CheckFailure>,
}

impl IntegrationResult {
    pub fn failed(&self, check: &str) -> bool {
        self.errors.iter().any(|e| e.check == check)
    }
}
