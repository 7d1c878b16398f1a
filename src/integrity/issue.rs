use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    OrphanedReference,
    InvalidReference,
    DuplicateEntry,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::OrphanedReference => "orphaned_reference",
            IssueKind::InvalidReference => "invalid_reference",
            IssueKind::DuplicateEntry => "duplicate_entry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A data defect found by one scan. Issues are rebuilt on every scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub entity: String,
    pub severity: Severity,
    pub description: String,
    pub affected_ids: Vec<String>,
    pub suggested_fix: String,
    pub can_auto_fix: bool,
    /// Collection holding the affected records.
    pub collection: String,
    /// Field the defect was found on.
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataIntegrityReport {
    pub timestamp: DateTime<Utc>,
    pub issues: Vec<IntegrityIssue>,
    pub fixed_count: usize,
    pub pending_count: usize,
}

impl DataIntegrityReport {
    pub fn new(issues: Vec<IntegrityIssue>) -> Self {
        Self {
            timestamp: Utc::now(),
            pending_count: issues.len(),
            issues,
            fixed_count: 0,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn count_by_kind(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }
}
