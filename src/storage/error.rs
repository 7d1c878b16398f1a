use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document in '{0}' has no id field")]
    MissingId(String),

    #[error("Duplicate id '{id}' in collection '{collection}'")]
    DuplicateId { collection: String, id: String },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid fixture: {0}")]
    InvalidFixture(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}
