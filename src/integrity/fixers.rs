use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::issue::{IntegrityIssue, IssueKind};
use crate::storage::{Filter, Transaction, Update};

/// Repairs one kind of issue inside a transaction the caller owns.
#[async_trait]
pub trait IssueFixer: Send + Sync {
    /// Applies the repair and returns the number of records changed.
    async fn apply(&self, issue: &IntegrityIssue, tx: &mut dyn Transaction) -> anyhow::Result<u64>;
}

/// Clears the dangling field on every affected record.
pub struct UnsetReferenceFixer;

#[async_trait]
impl IssueFixer for UnsetReferenceFixer {
    async fn apply(&self, issue: &IntegrityIssue, tx: &mut dyn Transaction) -> anyhow::Result<u64> {
        if issue.affected_ids.is_empty() {
            return Ok(0);
        }
        let modified = tx
            .update_many(
                &issue.collection,
                &Filter::ids(issue.affected_ids.iter().cloned()),
                &[Update::Unset(issue.field.clone())],
            )
            .await?;
        Ok(modified)
    }
}

#[derive(Clone)]
pub struct FixRegistry {
    fixers: HashMap<IssueKind, Arc<dyn IssueFixer>>,
}

impl FixRegistry {
    pub fn empty() -> Self {
        Self {
            fixers: HashMap::new(),
        }
    }

    pub fn register(mut self, kind: IssueKind, fixer: Arc<dyn IssueFixer>) -> Self {
        self.fixers.insert(kind, fixer);
        self
    }

    pub fn resolve(&self, kind: IssueKind) -> Option<Arc<dyn IssueFixer>> {
        self.fixers.get(&kind).cloned()
    }
}

impl Default for FixRegistry {
    fn default() -> Self {
        let unset: Arc<dyn IssueFixer> = Arc::new(UnsetReferenceFixer);
        Self::empty()
            .register(IssueKind::OrphanedReference, Arc::clone(&unset))
            .register(IssueKind::InvalidReference, unset)
    }
}
