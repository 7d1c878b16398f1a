use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// `sorted[max(0, ceil(p/100 * n) - 1)]`; zero for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64 / 100.0).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBenchmark {
    pub operation: String,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub sample_size: usize,
}

/// Raw durations for one operation, capped FIFO.
#[derive(Debug, Clone)]
pub struct BenchmarkSamples {
    durations: VecDeque<f64>,
    capacity: usize,
}

impl BenchmarkSamples {
    pub fn new(capacity: usize) -> Self {
        Self {
            durations: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, duration_ms: f64) {
        while self.durations.len() >= self.capacity {
            self.durations.pop_front();
        }
        self.durations.push_back(duration_ms);
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    pub fn stats(&self, operation: &str) -> Option<PerformanceBenchmark> {
        if self.durations.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.durations.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        Some(PerformanceBenchmark {
            operation: operation.to_string(),
            average: sorted.iter().sum::<f64>() / n as f64,
            min: sorted[0],
            max: sorted[n - 1],
            p50: percentile(&sorted, 50.0),
            p90: percentile(&sorted, 90.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
            sample_size: n,
        })
    }
}
