//! Declarative detector rules. Each rule names the collections and fields it
//! inspects, so new relations are added through configuration.

use serde::{Deserialize, Serialize};

use super::issue::{IntegrityIssue, IssueKind, Severity};

fn default_target_field() -> String {
    "id".to_string()
}

fn default_true() -> bool {
    true
}

/// A foreign key from `collection.field` to `target_collection.target_field`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRule {
    pub kind: IssueKind,
    pub entity: String,
    pub collection: String,
    pub field: String,
    pub target_collection: String,
    #[serde(default = "default_target_field")]
    pub target_field: String,
    pub severity: Severity,
}

impl ReferenceRule {
    pub fn new(kind: IssueKind, entity: &str, collection: &str, field: &str, target: &str) -> Self {
        Self {
            kind,
            entity: entity.to_string(),
            collection: collection.to_string(),
            field: field.to_string(),
            target_collection: target.to_string(),
            target_field: default_target_field(),
            severity: Severity::High,
        }
    }

    pub fn defaults() -> Vec<ReferenceRule> {
        vec![
            ReferenceRule::new(IssueKind::OrphanedReference, "Student", "students", "classId", "classes"),
            ReferenceRule::new(IssueKind::OrphanedReference, "Grade", "grades", "studentId", "students"),
            ReferenceRule::new(IssueKind::InvalidReference, "Class", "classes", "headTeacherId", "users"),
        ]
    }

    pub(crate) fn issue(&self, affected_ids: Vec<String>) -> IntegrityIssue {
        let noun = match self.kind {
            IssueKind::InvalidReference => "invalid",
            _ => "orphaned",
        };
        IntegrityIssue {
            kind: self.kind,
            entity: self.entity.clone(),
            severity: self.severity,
            description: format!(
                "{} {} record(s) with {noun} {} pointing at missing {}.{}",
                affected_ids.len(),
                self.entity,
                self.field,
                self.target_collection,
                self.target_field
            ),
            affected_ids,
            suggested_fix: format!("Unset the dangling {} reference", self.field),
            can_auto_fix: true,
            collection: self.collection.clone(),
            field: self.field.clone(),
        }
    }
}

/// A field that must be unique across `collection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateRule {
    pub entity: String,
    pub collection: String,
    pub field: String,
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
    pub severity: Severity,
}

impl DuplicateRule {
    pub fn new(entity: &str, collection: &str, field: &str) -> Self {
        Self {
            entity: entity.to_string(),
            collection: collection.to_string(),
            field: field.to_string(),
            case_insensitive: true,
            severity: Severity::Medium,
        }
    }

    pub fn defaults() -> Vec<DuplicateRule> {
        vec![
            DuplicateRule::new("Class", "classes", "name"),
            DuplicateRule::new("User", "users", "email"),
        ]
    }

    pub(crate) fn issue(&self, key: &str, affected_ids: Vec<String>) -> IntegrityIssue {
        IntegrityIssue {
            kind: IssueKind::DuplicateEntry,
            entity: self.entity.clone(),
            severity: self.severity,
            description: format!(
                "{} {} records share {} '{key}'",
                affected_ids.len(),
                self.entity,
                self.field
            ),
            affected_ids,
            suggested_fix: format!("Merge or rename the {} records sharing this {}", self.entity, self.field),
            can_auto_fix: false,
            collection: self.collection.clone(),
            field: self.field.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_rules_deserialize_with_default_target_field() {
        let rule: ReferenceRule = serde_json::from_value(serde_json::json!({
            "kind": "orphaned_reference",
            "entity": "Enrollment",
            "collection": "enrollments",
            "field": "studentId",
            "target_collection": "students",
            "severity": "high"
        }))
        .unwrap();
        assert_eq!(rule.target_field, "id");
    }

    #[test]
    fn duplicate_issues_are_never_auto_fixable() {
        let issue = DuplicateRule::new("User", "users", "email").issue("a@b.c", vec!["u1".into(), "u2".into()]);
        assert_eq!(issue.kind, IssueKind::DuplicateEntry);
        assert_eq!(issue.severity, Severity::Medium);
        assert!(!issue.can_auto_fix);
    }
}
