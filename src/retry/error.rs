use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Connection pool not found: {0}")]
    PoolNotFound(String),

    #[error("{context} failed after {attempts} attempts on pool '{pool_id}': {source}")]
    Exhausted {
        pool_id: String,
        context: String,
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Max retries exceeded for {0}")]
    MaxRetriesExceeded(String),
}
