use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered from best to worst, so `max` picks the worst status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub component: String,
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub last_checked: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub message: Option<String>,
}

/// Latest result per component.
#[derive(Debug, Default)]
pub struct HealthBoard {
    results: HashMap<String, HealthCheckResult>,
}

impl HealthBoard {
    /// Stores a new result. Consecutive failures grow on every unhealthy
    /// result and reset on anything else.
    pub fn record(
        &mut self,
        component: &str,
        status: HealthStatus,
        response_time_ms: u64,
        message: Option<String>,
    ) -> HealthCheckResult {
        let previous = self
            .results
            .get(component)
            .map(|r| r.consecutive_failures)
            .unwrap_or(0);
        let consecutive_failures = match status {
            HealthStatus::Unhealthy => previous.saturating_add(1),
            _ => 0,
        };
        let result = HealthCheckResult {
            component: component.to_string(),
            status,
            response_time_ms,
            last_checked: Utc::now(),
            consecutive_failures,
            message,
        };
        self.results.insert(component.to_string(), result.clone());
        result
    }

    /// All results, ordered by component name.
    pub fn all(&self) -> Vec<HealthCheckResult> {
        let mut results: Vec<HealthCheckResult> = self.results.values().cloned().collect();
        results.sort_by(|a, b| a.component.cmp(&b.component));
        results
    }

    /// Worst status across components; healthy when nothing was checked yet.
    pub fn overall(&self) -> HealthStatus {
        self.results
            .values()
            .map(|r| r.status)
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}
