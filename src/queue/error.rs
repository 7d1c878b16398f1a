use thiserror::Error;

use super::operation::OperationStatus;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Sled error: {0}")]
    SledError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Operation not found: {0}")]
    NotFound(String),

    #[error("Operation already exists: {0}")]
    Duplicate(String),

    #[error("Invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: OperationStatus,
        to: OperationStatus,
    },
}

impl From<sled::Error> for QueueError {
    fn from(err: sled::Error) -> Self {
        QueueError::SledError(err.to_string())
    }
}
