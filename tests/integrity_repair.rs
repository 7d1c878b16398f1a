use std::sync::Arc;

use serde_json::json;
use syncwarden::config::{IntegrityConfig, RetryConfig};
use syncwarden::integrity::{IntegrityScanner, IssueKind};
use syncwarden::retry::RetryExecutor;
use syncwarden::storage::{Filter, MemoryAuditSink, MemoryStore, Store};

fn scanner(store: &MemoryStore, audit: Arc<MemoryAuditSink>) -> IntegrityScanner {
    let retry = RetryExecutor::new(&RetryConfig {
        base_delay_ms: 1,
        ..RetryConfig::default()
    });
    IntegrityScanner::new(
        Arc::new(store.clone()),
        Arc::new(retry),
        audit,
        IntegrityConfig::default(),
    )
}

fn school() -> MemoryStore {
    MemoryStore::from_json(json!({
        "users": [
            {"id": "u1", "email": "grace@school.test"},
            {"id": "u2", "email": "GRACE@school.test"},
            {"id": "u3", "email": "alan@school.test"}
        ],
        "classes": [
            {"id": "c1", "name": "Math", "headTeacherId": "u404"},
            {"id": "c2", "name": "math", "headTeacherId": "u1"},
            {"id": "c3", "name": "Biology", "headTeacherId": "u3"}
        ],
        "students": [
            {"id": "s1", "classId": "c1"},
            {"id": "s2", "classId": "c42"},
            {"id": "s3", "classId": "c77"}
        ],
        "grades": [
            {"id": "g1", "studentId": "s1", "score": 90},
            {"id": "g2", "studentId": "s99", "score": 55}
        ]
    }))
    .expect("fixture")
}

#[tokio::test]
async fn dangling_head_teacher_is_reported_and_repaired() {
    let store = MemoryStore::from_json(json!({
        "users": [{"id": "u1", "email": "a@school.test"}],
        "classes": [{"id": "c1", "name": "Chemistry", "headTeacherId": "u404"}]
    }))
    .expect("fixture");
    let audit = Arc::new(MemoryAuditSink::new());
    let scanner = scanner(&store, audit.clone());

    let report = scanner.check_data_integrity().await.expect("scan");
    assert_eq!(report.issues.len(), 1);
    let issue = &report.issues[0];
    assert_eq!(issue.kind, IssueKind::InvalidReference);
    assert_eq!(issue.entity, "Class");
    assert_eq!(issue.affected_ids, vec!["c1".to_string()]);

    let fixed = scanner.auto_fix_integrity_issues(report).await;
    assert_eq!(fixed.fixed_count, 1);
    assert_eq!(fixed.pending_count, 0);

    let c1 = store
        .find("classes", &Filter::eq("id", "c1"), None)
        .await
        .expect("find");
    assert!(c1[0].get("headTeacherId").is_none());
    assert_eq!(c1[0].get("name"), Some(&json!("Chemistry")));

    // The repaired data scans clean.
    assert!(scanner.check_data_integrity().await.expect("rescan").is_clean());
    assert_eq!(audit.records().len(), 1);
}

#[tokio::test]
async fn orphans_are_grouped_per_entity() {
    let store = school();
    let report = scanner(&store, Arc::new(MemoryAuditSink::new()))
        .check_data_integrity()
        .await
        .expect("scan");

    let students = report
        .issues
        .iter()
        .find(|i| i.kind == IssueKind::OrphanedReference && i.entity == "Student")
        .expect("student orphans");
    assert_eq!(students.affected_ids, vec!["s2".to_string(), "s3".to_string()]);

    let grades = report
        .issues
        .iter()
        .find(|i| i.entity == "Grade")
        .expect("grade orphans");
    assert_eq!(grades.affected_ids, vec!["g2".to_string()]);
}

#[tokio::test]
async fn duplicate_groups_ignore_case_and_are_left_for_humans() {
    let store = school();
    let scanner = scanner(&store, Arc::new(MemoryAuditSink::new()));
    let report = scanner.check_data_integrity().await.expect("scan");

    let duplicates: Vec<_> = report
        .issues
        .iter()
        .filter(|i| i.kind == IssueKind::DuplicateEntry)
        .cloned()
        .collect();
    assert_eq!(duplicates.len(), 2);
    assert!(duplicates
        .iter()
        .any(|i| i.entity == "Class" && i.affected_ids == vec!["c1".to_string(), "c2".to_string()]));
    assert!(duplicates
        .iter()
        .any(|i| i.entity == "User" && i.affected_ids == vec!["u1".to_string(), "u2".to_string()]));

    let fixed = scanner.auto_fix_integrity_issues(report).await;
    let manual_after: Vec<_> = fixed.issues.iter().filter(|i| !i.can_auto_fix).cloned().collect();
    assert_eq!(manual_after, duplicates);
    assert_eq!(fixed.fixed_count, 3);

    // Both names survive untouched.
    let classes = store.find("classes", &Filter::All, None).await.expect("find");
    assert_eq!(classes.len(), 3);
}
