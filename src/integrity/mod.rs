//! Referential and uniqueness checks over the record store, with
//! transactional repair of the defects that can be fixed mechanically.

mod error;
pub mod fixers;
pub mod issue;
pub mod rules;

use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::IntegrityConfig;
use crate::retry::RetryExecutor;
use crate::storage::{document_id, record_system_event, Aggregation, AuditSink, Document, Store};

pub use self::error::IntegrityError;
pub use self::fixers::{FixRegistry, IssueFixer, UnsetReferenceFixer};
pub use self::issue::{DataIntegrityReport, IntegrityIssue, IssueKind, Severity};
pub use self::rules::{DuplicateRule, ReferenceRule};

/// Retry pool the detectors run against.
pub const SCAN_POOL: &str = "database";

pub struct IntegrityScanner {
    store: Arc<dyn Store>,
    retry: Arc<RetryExecutor>,
    audit: Arc<dyn AuditSink>,
    config: IntegrityConfig,
    fixers: FixRegistry,
}

impl IntegrityScanner {
    pub fn new(
        store: Arc<dyn Store>,
        retry: Arc<RetryExecutor>,
        audit: Arc<dyn AuditSink>,
        config: IntegrityConfig,
    ) -> Self {
        Self {
            store,
            retry,
            audit,
            config,
            fixers: FixRegistry::default(),
        }
    }

    pub fn with_fixers(mut self, fixers: FixRegistry) -> Self {
        self.fixers = fixers;
        self
    }

    /// Runs every configured detector. Defects are reported, never returned as errors;
    /// an `Err` means the store itself could not be read.
    pub async fn check_data_integrity(&self) -> Result<DataIntegrityReport, IntegrityError> {
        let mut issues = Vec::new();

        for rule in &self.config.references {
            let rows = self
                .run_aggregation(
                    &rule.collection,
                    Aggregation::UnmatchedReferences {
                        local_field: rule.field.clone(),
                        foreign_collection: rule.target_collection.clone(),
                        foreign_field: rule.target_field.clone(),
                    },
                    &format!("{} reference check", rule.entity),
                )
                .await?;
            let ids: Vec<String> = rows.iter().filter_map(document_id).collect();
            if !ids.is_empty() {
                issues.push(rule.issue(ids));
            }
        }

        for rule in &self.config.duplicates {
            let groups = self
                .run_aggregation(
                    &rule.collection,
                    Aggregation::GroupByKey {
                        field: rule.field.clone(),
                        case_insensitive: rule.case_insensitive,
                        min_count: 2,
                    },
                    &format!("{} duplicate check", rule.entity),
                )
                .await?;
            for group in groups {
                let key = group.get("key").and_then(Value::as_str).unwrap_or_default();
                let ids = group
                    .get("ids")
                    .and_then(Value::as_array)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|id| id.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                issues.push(rule.issue(key, ids));
            }
        }

        let report = DataIntegrityReport::new(issues);
        if report.is_clean() {
            log::info!("Integrity scan found no issues");
        } else {
            log::warn!("Integrity scan found {} issues", report.pending_count);
        }
        Ok(report)
    }

    /// Repairs every auto-fixable issue in its own transaction.
    ///
    /// Issues that cannot be fixed automatically, and fixes that fail, stay in
    /// the returned report unchanged.
    pub async fn auto_fix_integrity_issues(&self, report: DataIntegrityReport) -> DataIntegrityReport {
        let mut remaining = Vec::new();
        let mut fixed_count = report.fixed_count;

        for issue in report.issues {
            if !issue.can_auto_fix {
                remaining.push(issue);
                continue;
            }

            match self.fix_issue(&issue).await {
                Ok(modified) => {
                    fixed_count += 1;
                    log::info!(
                        "Fixed {} on {} ({} records updated)",
                        issue.kind.as_str(),
                        issue.entity,
                        modified
                    );
                    record_system_event(
                        self.audit.as_ref(),
                        "DATA_INTEGRITY_FIX",
                        json!({
                            "issueType": issue.kind,
                            "entity": issue.entity,
                            "affectedIds": issue.affected_ids,
                            "modifiedCount": modified,
                        }),
                    )
                    .await;
                }
                Err(e) => {
                    log::error!("Auto-fix of {} on {} failed: {e}", issue.kind.as_str(), issue.entity);
                    remaining.push(issue);
                }
            }
        }

        DataIntegrityReport {
            timestamp: chrono::Utc::now(),
            pending_count: remaining.len(),
            issues: remaining,
            fixed_count,
        }
    }

    async fn fix_issue(&self, issue: &IntegrityIssue) -> Result<u64, IntegrityError> {
        let fixer = self
            .fixers
            .resolve(issue.kind)
            .ok_or(IntegrityError::NoFixer(issue.kind))?;

        let mut tx = self.store.begin().await?;
        match fixer.apply(issue, tx.as_mut()).await {
            Ok(modified) => {
                tx.commit().await?;
                Ok(modified)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    log::warn!("Rollback after failed fix on {} failed: {rollback}", issue.entity);
                }
                Err(IntegrityError::FixFailed {
                    kind: issue.kind,
                    entity: issue.entity.clone(),
                    source: e.into(),
                })
            }
        }
    }

    async fn run_aggregation(
        &self,
        collection: &str,
        aggregation: Aggregation,
        context: &str,
    ) -> Result<Vec<Document>, IntegrityError> {
        let rows = self
            .retry
            .execute_with_retry(SCAN_POOL, context, || {
                let store = Arc::clone(&self.store);
                let aggregation = aggregation.clone();
                async move {
                    store
                        .aggregate(collection, &aggregation)
                        .await
                        .map_err(anyhow::Error::from)
                }
            })
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::storage::{Filter, MemoryAuditSink, MemoryStore, StoreError, Transaction};
    use async_trait::async_trait;

    fn fixture() -> MemoryStore {
        MemoryStore::from_json(json!({
            "users": [
                {"id": "u1", "email": "ada@school.test"},
                {"id": "u2", "email": "Ada@School.test "}
            ],
            "classes": [
                {"id": "c1", "name": "Math", "headTeacherId": "u404"},
                {"id": "c2", "name": "math", "headTeacherId": "u1"},
                {"id": "c3", "name": "Physics"}
            ],
            "students": [
                {"id": "s1", "classId": "c1"},
                {"id": "s2", "classId": "c9"},
                {"id": "s3", "classId": null}
            ],
            "grades": [
                {"id": "g1", "studentId": "s1"},
                {"id": "g2", "studentId": "s7"}
            ]
        }))
        .unwrap()
    }

    fn scanner(store: MemoryStore, audit: Arc<MemoryAuditSink>) -> IntegrityScanner {
        let retry = RetryConfig {
            base_delay_ms: 1,
            ..RetryConfig::default()
        };
        IntegrityScanner::new(
            Arc::new(store),
            Arc::new(RetryExecutor::new(&retry)),
            audit,
            IntegrityConfig::default(),
        )
    }

    #[tokio::test]
    async fn scan_reports_each_defect_kind() {
        let scanner = scanner(fixture(), Arc::new(MemoryAuditSink::new()));
        let report = scanner.check_data_integrity().await.unwrap();

        assert_eq!(report.fixed_count, 0);
        assert_eq!(report.pending_count, report.issues.len());
        assert_eq!(report.count_by_kind(IssueKind::OrphanedReference), 2);
        assert_eq!(report.count_by_kind(IssueKind::InvalidReference), 1);
        assert_eq!(report.count_by_kind(IssueKind::DuplicateEntry), 2);

        let students = report.issues.iter().find(|i| i.entity == "Student").unwrap();
        assert_eq!(students.affected_ids, vec!["s2".to_string()]);
        assert_eq!(students.severity, Severity::High);
        assert!(students.can_auto_fix);
    }

    #[tokio::test]
    async fn case_variants_form_one_duplicate_group() {
        let store = MemoryStore::from_json(json!({
            "classes": [{"id": "c1", "name": "Math"}, {"id": "c2", "name": "math"}]
        }))
        .unwrap();
        let report = scanner(store, Arc::new(MemoryAuditSink::new()))
            .check_data_integrity()
            .await
            .unwrap();

        assert_eq!(report.issues.len(), 1);
        let issue = &report.issues[0];
        assert_eq!(issue.kind, IssueKind::DuplicateEntry);
        assert_eq!(issue.affected_ids, vec!["c1".to_string(), "c2".to_string()]);
        assert!(!issue.can_auto_fix);
    }

    #[tokio::test]
    async fn invalid_head_teacher_is_found_and_unset() {
        let store = MemoryStore::from_json(json!({
            "users": [{"id": "u1"}],
            "classes": [{"id": "c1", "name": "Math", "headTeacherId": "u404"}]
        }))
        .unwrap();
        let audit = Arc::new(MemoryAuditSink::new());
        let scanner = scanner(store.clone(), audit.clone());

        let report = scanner.check_data_integrity().await.unwrap();
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, IssueKind::InvalidReference);
        assert_eq!(report.issues[0].entity, "Class");
        assert_eq!(report.issues[0].affected_ids, vec!["c1".to_string()]);

        let fixed = scanner.auto_fix_integrity_issues(report).await;
        assert_eq!(fixed.fixed_count, 1);
        assert_eq!(fixed.pending_count, 0);

        let rows = store.find("classes", &Filter::eq("id", "c1"), None).await.unwrap();
        assert!(!rows[0].contains_key("headTeacherId"));
        assert_eq!(audit.with_action("DATA_INTEGRITY_FIX").len(), 1);
    }

    #[tokio::test]
    async fn padded_reference_does_not_match_parent() {
        let store = MemoryStore::from_json(json!({
            "users": [{"id": "u1"}],
            "classes": [
                {"id": "c1", "name": "Math", "headTeacherId": "u1 "},
                {"id": "c2", "name": "Art", "headTeacherId": 1}
            ]
        }))
        .unwrap();
        let report = scanner(store, Arc::new(MemoryAuditSink::new()))
            .check_data_integrity()
            .await
            .unwrap();

        assert_eq!(report.count_by_kind(IssueKind::InvalidReference), 1);
        assert_eq!(
            report.issues[0].affected_ids,
            vec!["c1".to_string(), "c2".to_string()]
        );
    }

    #[tokio::test]
    async fn non_fixable_issues_pass_through_unchanged() {
        let scanner = scanner(fixture(), Arc::new(MemoryAuditSink::new()));
        let report = scanner.check_data_integrity().await.unwrap();
        let manual: Vec<IntegrityIssue> = report
            .issues
            .iter()
            .filter(|i| !i.can_auto_fix)
            .cloned()
            .collect();

        let fixed = scanner.auto_fix_integrity_issues(report).await;
        assert_eq!(fixed.fixed_count, 3);
        assert_eq!(fixed.issues, manual);
        assert_eq!(fixed.pending_count, manual.len());
    }

    struct Broken;

    #[async_trait]
    impl IssueFixer for Broken {
        async fn apply(&self, issue: &IntegrityIssue, tx: &mut dyn Transaction) -> anyhow::Result<u64> {
            tx.update_many(
                &issue.collection,
                &Filter::All,
                &[crate::storage::Update::Unset(issue.field.clone())],
            )
            .await?;
            Err(StoreError::Unavailable("write conflict".into()).into())
        }
    }

    #[tokio::test]
    async fn failed_fix_rolls_back_and_keeps_issue() {
        let store = fixture();
        let audit = Arc::new(MemoryAuditSink::new());
        let scanner = scanner(store.clone(), audit.clone()).with_fixers(
            FixRegistry::empty().register(IssueKind::InvalidReference, Arc::new(Broken)),
        );

        let report = scanner.check_data_integrity().await.unwrap();
        let before = report.issues.len();
        let fixed = scanner.auto_fix_integrity_issues(report).await;

        assert_eq!(fixed.fixed_count, 0);
        assert_eq!(fixed.issues.len(), before);
        let c1 = store.find("classes", &Filter::eq("id", "c1"), None).await.unwrap();
        assert_eq!(c1[0].get("headTeacherId"), Some(&json!("u404")));
        assert!(audit.records().is_empty());
    }

    #[tokio::test]
    async fn unreachable_store_fails_the_scan() {
        let store = fixture();
        store.set_available(false);
        let scanner = scanner(store, Arc::new(MemoryAuditSink::new()));
        assert!(matches!(
            scanner.check_data_integrity().await,
            Err(IntegrityError::Scan(_))
        ));
    }
}
