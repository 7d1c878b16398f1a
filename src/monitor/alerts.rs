use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::integrity::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ConsecutiveFailures,
    SlowResponse,
}

/// A condition that currently holds. Alerts are recomputed, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    /// Component or metric name the alert is about.
    pub source: String,
    pub message: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}
