use thiserror::Error;

use super::issue::IssueKind;
use crate::retry::RetryError;
use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Scan failed: {0}")]
    Scan(#[from] RetryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("No fixer registered for {0:?}")]
    NoFixer(IssueKind),

    #[error("Fix for {kind:?} on {entity} failed: {source}")]
    FixFailed {
        kind: IssueKind,
        entity: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
