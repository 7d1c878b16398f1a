//! Bounded retries with exponential backoff, tracked per connection pool.

mod error;
mod pool;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::sleep;

use crate::config::RetryConfig;

pub use self::error::RetryError;
pub use self::pool::{ConnectionPool, PoolKind, PoolStatus};

pub struct RetryExecutor {
    pools: RwLock<HashMap<String, ConnectionPool>>,
    base_delay: Duration,
}

impl RetryExecutor {
    pub fn new(config: &RetryConfig) -> Self {
        let executor = Self {
            pools: RwLock::new(HashMap::new()),
            base_delay: config.base_delay(),
        };
        for pool in &config.pools {
            executor.register_pool(&pool.id, pool.kind, pool.max_retries);
        }
        executor
    }

    /// Registers a pool, replacing any existing pool with the same id.
    pub fn register_pool(&self, id: &str, kind: PoolKind, max_retries: u32) {
        self.pools
            .write()
            .insert(id.to_string(), ConnectionPool::new(id, kind, max_retries));
    }

    /// Backoff before the attempt following `attempt` (0-based): `base * 2^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        match 1u32.checked_shl(attempt) {
            Some(factor) => self.base_delay.checked_mul(factor).unwrap_or(Duration::MAX),
            None => Duration::MAX,
        }
    }

    /// Runs `work` up to `max_retries + 1` times against `pool_id`.
    ///
    /// The pool is marked active before each attempt. Success resets the retry
    /// count and idles the pool; exhausting every attempt leaves it in `error`.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        pool_id: &str,
        context: &str,
        mut work: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_retries = self
            .pools
            .read()
            .get(pool_id)
            .map(|p| p.max_retries)
            .ok_or_else(|| RetryError::PoolNotFound(pool_id.to_string()))?;

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=max_retries {
            self.with_pool(pool_id, |p| p.mark_active());

            match work().await {
                Ok(value) => {
                    self.with_pool(pool_id, |p| p.mark_success());
                    if attempt > 0 {
                        log::info!("{context} succeeded on pool '{pool_id}' after {attempt} retries");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    self.with_pool(pool_id, |p| p.mark_failure(attempt, message.clone()));

                    if attempt < max_retries {
                        let delay = self.backoff_delay(attempt);
                        log::warn!(
                            "{context} failed on pool '{pool_id}' (attempt {}/{}): {message}. Retrying in {:?}",
                            attempt + 1,
                            max_retries + 1,
                            delay
                        );
                        sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        self.with_pool(pool_id, |p| p.status = PoolStatus::Error);
        log::error!("{context} exhausted {} attempts on pool '{pool_id}'", max_retries + 1);

        match last_error {
            Some(e) => Err(RetryError::Exhausted {
                pool_id: pool_id.to_string(),
                context: context.to_string(),
                attempts: max_retries + 1,
                source: e.into(),
            }),
            None => Err(RetryError::MaxRetriesExceeded(context.to_string())),
        }
    }

    pub fn pool(&self, pool_id: &str) -> Option<ConnectionPool> {
        self.pools.read().get(pool_id).cloned()
    }

    /// All pools, ordered by id.
    pub fn pool_status(&self) -> Vec<ConnectionPool> {
        let mut pools: Vec<ConnectionPool> = self.pools.read().values().cloned().collect();
        pools.sort_by(|a, b| a.id.cmp(&b.id));
        pools
    }

    /// Returns the pool to `idle` with a cleared retry count. Unknown ids are ignored.
    pub fn reset_pool(&self, pool_id: &str) {
        if self.with_pool(pool_id, |p| p.reset()) {
            log::info!("Connection pool '{pool_id}' reset");
        } else {
            log::debug!("Ignoring reset of unknown pool '{pool_id}'");
        }
    }

    fn with_pool(&self, pool_id: &str, f: impl FnOnce(&mut ConnectionPool)) -> bool {
        match self.pools.write().get_mut(pool_id) {
            Some(pool) => {
                f(pool);
                true
            }
            None => false,
        }
    }
}
