use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::integrity::{DuplicateRule, ReferenceRule};
use crate::retry::PoolKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub queue: QueueConfig,
    pub verify: VerifyConfig,
    pub integrity: IntegrityConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub id: String,
    pub kind: PoolKind,
    pub max_retries: u32,
}

impl PoolConfig {
    pub fn new(id: &str, kind: PoolKind, max_retries: u32) -> Self {
        Self {
            id: id.to_string(),
            kind,
            max_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the second attempt; doubles on every further attempt.
    pub base_delay_ms: u64,
    pub pools: Vec<PoolConfig>,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            pools: vec![
                PoolConfig::new("database", PoolKind::Database, 3),
                PoolConfig::new("cache", PoolKind::Cache, 3),
                PoolConfig::new("collections", PoolKind::Database, 2),
                PoolConfig::new("connectivity", PoolKind::External, 2),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub data_dir: String,
    /// Rows stuck in `processing` longer than this are reclaimed on startup.
    pub processing_timeout_secs: u64,
    pub batch_size: usize,
    pub max_retries: u32,
}

impl QueueConfig {
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            processing_timeout_secs: 30 * 60,
            batch_size: 10,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub tracked_collections: Vec<String>,
    pub probe_collection: String,
    pub probe_ttl_ms: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            tracked_collections: ["users", "classes", "students", "grades"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            probe_collection: "_sync_probes".to_string(),
            probe_ttl_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    pub references: Vec<ReferenceRule>,
    pub duplicates: Vec<DuplicateRule>,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            references: ReferenceRule::defaults(),
            duplicates: DuplicateRule::defaults(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub health_interval_secs: u64,
    pub integrity_interval_secs: u64,
    pub queue_interval_secs: u64,
    pub response_time_warning_ms: f64,
    pub response_time_critical_ms: f64,
    pub consecutive_failure_threshold: u32,
    pub queue_degraded_depth: u64,
    pub metric_window: usize,
    pub benchmark_window: usize,
    pub alert_sample_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: 60,
            integrity_interval_secs: 60 * 60,
            queue_interval_secs: 5 * 60,
            response_time_warning_ms: 1000.0,
            response_time_critical_ms: 5000.0,
            consecutive_failure_threshold: 3,
            queue_degraded_depth: 100,
            metric_window: 100,
            benchmark_window: 1000,
            alert_sample_window: 5,
        }
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse::<T>().ok())
}

impl EngineConfig {
    /// Reads a JSON config file when given, applies `SYNCWARDEN_*` environment
    /// overrides, then validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw)?
            }
            None => EngineConfig::default(),
        };
        config.apply_overrides(&|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("SYNCWARDEN_DATA_DIR").filter(|d| !d.is_empty()) {
            self.queue.data_dir = dir;
        }
        if let Some(ms) = parse_env::<u64>(lookup, "SYNCWARDEN_RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = ms;
        }
        if let Some(secs) = parse_env::<u64>(lookup, "SYNCWARDEN_HEALTH_INTERVAL_SECS").filter(|&n| n > 0) {
            self.monitor.health_interval_secs = secs;
        }
        if let Some(secs) = parse_env::<u64>(lookup, "SYNCWARDEN_INTEGRITY_INTERVAL_SECS").filter(|&n| n > 0) {
            self.monitor.integrity_interval_secs = secs;
        }
        if let Some(secs) = parse_env::<u64>(lookup, "SYNCWARDEN_QUEUE_INTERVAL_SECS").filter(|&n| n > 0) {
            self.monitor.queue_interval_secs = secs;
        }
        if let Some(ms) = parse_env::<f64>(lookup, "SYNCWARDEN_RESPONSE_WARNING_MS") {
            self.monitor.response_time_warning_ms = ms;
        }
        if let Some(ms) = parse_env::<f64>(lookup, "SYNCWARDEN_RESPONSE_CRITICAL_MS") {
            self.monitor.response_time_critical_ms = ms;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.monitor;
        if m.health_interval_secs == 0 || m.integrity_interval_secs == 0 || m.queue_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep intervals must be non-zero".into()));
        }
        if m.metric_window == 0 || m.benchmark_window == 0 || m.alert_sample_window == 0 {
            return Err(ConfigError::Invalid("sample windows must be non-zero".into()));
        }
        if m.response_time_warning_ms > m.response_time_critical_ms {
            return Err(ConfigError::Invalid(format!(
                "warning threshold {}ms exceeds critical threshold {}ms",
                m.response_time_warning_ms, m.response_time_critical_ms
            )));
        }
        if self.queue.batch_size == 0 {
            return Err(ConfigError::Invalid("queue batch size must be non-zero".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for pool in &self.retry.pools {
            if !seen.insert(pool.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate pool id '{}'", pool.id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn config_default_values_are_sensible() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.queue.processing_timeout(), Duration::from_secs(1800));
        assert_eq!(cfg.queue.batch_size, 10);
        assert_eq!(cfg.monitor.health_interval_secs, 60);
        assert_eq!(cfg.monitor.integrity_interval_secs, 3600);
        assert_eq!(cfg.monitor.queue_interval_secs, 300);
        assert_eq!(cfg.monitor.metric_window, 100);
        assert_eq!(cfg.monitor.benchmark_window, 1000);
        assert_eq!(cfg.retry.pools.len(), 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"monitor": {"response_time_critical_ms": 2500.0}}"#).unwrap();
        assert_eq!(cfg.monitor.response_time_critical_ms, 2500.0);
        assert_eq!(cfg.monitor.response_time_warning_ms, 1000.0);
        assert_eq!(cfg.queue, QueueConfig::default());
    }

    #[test]
    fn overrides_ignore_garbage_and_zero_intervals() {
        let env: HashMap<&str, &str> = [
            ("SYNCWARDEN_DATA_DIR", "/var/lib/warden"),
            ("SYNCWARDEN_RETRY_BASE_DELAY_MS", "5"),
            ("SYNCWARDEN_HEALTH_INTERVAL_SECS", "0"),
            ("SYNCWARDEN_QUEUE_INTERVAL_SECS", "soon"),
        ]
        .into_iter()
        .collect();

        let mut cfg = EngineConfig::default();
        cfg.apply_overrides(&|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.queue.data_dir, "/var/lib/warden");
        assert_eq!(cfg.retry.base_delay_ms, 5);
        assert_eq!(cfg.monitor.health_interval_secs, 60);
        assert_eq!(cfg.monitor.queue_interval_secs, 300);
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let mut cfg = EngineConfig::default();
        cfg.monitor.response_time_warning_ms = 9000.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_duplicate_pools() {
        let mut cfg = EngineConfig::default();
        cfg.retry.pools.push(PoolConfig::new("cache", PoolKind::Cache, 1));
        assert!(cfg.validate().is_err());
    }
}
