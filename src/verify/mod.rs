//! Composite health check over the record store and the cache.
//!
//! Four checks run in sequence, each through the retry executor on its own
//! pool. A failing check is recorded and the remaining checks still run.

mod report;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use serde_json::{json, Value};

use crate::common::time::elapsed_ms;
use crate::config::VerifyConfig;
use crate::retry::{RetryError, RetryExecutor};
use crate::storage::{record_system_event, AuditSink, Cache, Filter, Store};

pub use self::report::{
    CacheCheck, CheckFailure, CollectionCheck, ConnectivityCheck, DatabaseCheck,
    IntegrationDetails, IntegrationResult,
};

pub const DATABASE_POOL: &str = "database";
pub const CACHE_POOL: &str = "cache";
pub const COLLECTIONS_POOL: &str = "collections";
pub const CONNECTIVITY_POOL: &str = "connectivity";

pub struct IntegrationVerifier {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    audit: Arc<dyn AuditSink>,
    retry: Arc<RetryExecutor>,
    config: VerifyConfig,
}

impl IntegrationVerifier {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        audit: Arc<dyn AuditSink>,
        retry: Arc<RetryExecutor>,
        config: VerifyConfig,
    ) -> Self {
        Self {
            store,
            cache,
            audit,
            retry,
            config,
        }
    }

    pub async fn verify_system_integration(&self) -> IntegrationResult {
        let started = Instant::now();
        let mut details = IntegrationDetails::default();
        let mut errors = Vec::new();

        match self.check_database().await {
            Ok(check) => details.database = Some(check),
            Err(e) => errors.push(failure("database", &e)),
        }

        match self.check_cache().await {
            Ok(check) => details.cache = Some(check),
            Err(e) => errors.push(failure("cache", &e)),
        }

        for collection in &self.config.tracked_collections {
            let check = match self.check_collection(collection).await {
                Ok(count) => CollectionCheck {
                    accessible: true,
                    count: Some(count),
                    error: None,
                },
                Err(e) => {
                    let failure = failure(&format!("collections.{collection}"), &e);
                    let check = CollectionCheck {
                        accessible: false,
                        count: None,
                        error: Some(failure.message.clone()),
                    };
                    errors.push(failure);
                    check
                }
            };
            details.collections.insert(collection.clone(), check);
        }

        match self.check_connectivity().await {
            Ok(check) => details.connectivity = Some(check),
            Err(e) => errors.push(failure("connectivity", &e)),
        }

        let result = IntegrationResult {
            success: errors.is_empty(),
            timestamp: Utc::now(),
            duration_ms: elapsed_ms(started),
            details,
            errors,
        };

        if result.success {
            log::info!("Integration verification passed in {}ms", result.duration_ms);
        } else {
            log::warn!(
                "Integration verification failed {} checks in {}ms",
                result.errors.len(),
                result.duration_ms
            );
        }

        record_system_event(
            self.audit.as_ref(),
            "SYSTEM_INTEGRATION_VERIFIED",
            json!({
                "success": result.success,
                "durationMs": result.duration_ms,
                "components": result.details.component_count(),
                "errors": result.errors.len(),
            }),
        )
        .await;

        result
    }

    async fn check_database(&self) -> Result<DatabaseCheck, RetryError> {
        self.retry
            .execute_with_retry(DATABASE_POOL, "database health check", || {
                let store = Arc::clone(&self.store);
                async move {
                    let started = Instant::now();
                    store.ping().await?;
                    let server = store.server_status().await?;
                    Ok::<_, anyhow::Error>(DatabaseCheck {
                        server,
                        response_time_ms: elapsed_ms(started),
                    })
                }
            })
            .await
    }

    async fn check_cache(&self) -> Result<CacheCheck, RetryError> {
        let ttl = Duration::from_millis(self.config.probe_ttl_ms);
        self.retry
            .execute_with_retry(CACHE_POOL, "cache health check", || {
                let cache = Arc::clone(&self.cache);
                async move {
                    let started = Instant::now();
                    let key = format!("health:probe:{:016x}", rand::random::<u64>());
                    let value = json!({ "checkedAt": Utc::now() });
                    cache.set(&key, value.clone(), ttl).await?;
                    let read = cache.get(&key).await?;
                    cache.delete_pattern(&key).await?;
                    if read.as_ref() != Some(&value) {
                        anyhow::bail!("cache probe '{key}' did not read back");
                    }
                    Ok::<_, anyhow::Error>(CacheCheck {
                        response_time_ms: elapsed_ms(started),
                    })
                }
            })
            .await
    }

    async fn check_collection(&self, collection: &str) -> Result<u64, RetryError> {
        let context = format!("{collection} accessibility check");
        self.retry
            .execute_with_retry(COLLECTIONS_POOL, &context, || {
                let store = Arc::clone(&self.store);
                async move {
                    store
                        .count(collection, &Filter::All)
                        .await
                        .map_err(anyhow::Error::from)
                }
            })
            .await
    }

    async fn check_connectivity(&self) -> Result<ConnectivityCheck, RetryError> {
        self.retry
            .execute_with_retry(CONNECTIVITY_POOL, "cross-store connectivity check", || {
                self.connectivity_probe()
            })
            .await
    }

    /// Writes a probe record, reads it back through the cache, runs an empty
    /// transaction, then removes the probe from both stores.
    async fn connectivity_probe(&self) -> anyhow::Result<ConnectivityCheck> {
        let started = Instant::now();
        let probe_id = format!("probe-{:016x}", rand::random::<u64>());
        let cache_key = format!("sync-probe:{probe_id}");
        let collection = self.config.probe_collection.as_str();

        let probe = json!({ "id": probe_id, "createdAt": Utc::now() });
        let doc = match probe {
            Value::Object(doc) => doc,
            _ => anyhow::bail!("probe record is not an object"),
        };
        self.store.insert(collection, doc).await?;

        let outcome = self.probe_round_trip(collection, &probe_id, &cache_key).await;

        if let Err(e) = self.store.delete_many(collection, &Filter::ids([probe_id.clone()])).await {
            log::warn!("Failed to remove connectivity probe {probe_id}: {e}");
        }
        if let Err(e) = self.cache.delete_pattern(&cache_key).await {
            log::warn!("Failed to evict connectivity probe {cache_key}: {e}");
        }

        outcome?;
        Ok(ConnectivityCheck {
            probe_id,
            round_trip_ms: elapsed_ms(started),
            transactional: true,
        })
    }

    async fn probe_round_trip(&self, collection: &str, probe_id: &str, cache_key: &str) -> anyhow::Result<()> {
        let stored = self
            .store
            .find(collection, &Filter::ids([probe_id]), Some(1))
            .await?
            .into_iter()
            .next()
            .with_context(|| format!("probe {probe_id} missing after insert"))?;

        let ttl = Duration::from_millis(self.config.probe_ttl_ms);
        let value = Value::Object(stored);
        self.cache.set(cache_key, value.clone(), ttl).await?;
        let cached = self.cache.get(cache_key).await?;
        if cached.as_ref() != Some(&value) {
            anyhow::bail!("probe {probe_id} did not round-trip through the cache");
        }

        let tx = self.store.begin().await?;
        tx.commit().await?;
        Ok(())
    }
}

fn failure(check: &str, error: &RetryError) -> CheckFailure {
    CheckFailure {
        check: check.to_string(),
        message: error.to_string(),
    }
}
