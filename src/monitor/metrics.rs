use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Normal,
    Warning,
    Critical,
}

/// How a metric's value is judged. Only response times have thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    ResponseTime,
    Gauge,
}

impl MetricKind {
    /// Metrics named like `db.responseTime` are response times.
    pub fn classify(name: &str) -> Self {
        if name.contains("responseTime") {
            MetricKind::ResponseTime
        } else {
            MetricKind::Gauge
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Thresholds {
    pub fn status(&self, kind: MetricKind, value: f64) -> MetricStatus {
        match kind {
            MetricKind::Gauge => MetricStatus::Normal,
            MetricKind::ResponseTime if value > self.critical => MetricStatus::Critical,
            MetricKind::ResponseTime if value > self.warning => MetricStatus::Warning,
            MetricKind::ResponseTime => MetricStatus::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringMetric {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub status: MetricStatus,
    pub kind: MetricKind,
}

/// Samples for one metric name, oldest evicted first once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct MetricWindow {
    samples: VecDeque<MonitoringMetric>,
    capacity: usize,
}

impl MetricWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, metric: MonitoringMetric) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(metric);
    }

    pub fn latest(&self) -> Option<&MonitoringMetric> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean of the newest `n` values, or `None` for an empty window.
    pub fn recent_mean(&self, n: usize) -> Option<f64> {
        let take = n.min(self.samples.len());
        if take == 0 {
            return None;
        }
        let sum: f64 = self.samples.iter().rev().take(take).map(|m| m.value).sum();
        Some(sum / take as f64)
    }
}
