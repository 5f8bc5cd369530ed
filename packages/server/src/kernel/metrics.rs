//! Request metrics for outbound calls.
//!
//! The collector keeps two views of the same stream of outcomes:
//! - cumulative counters for the whole process lifetime (atomics)
//! - a bounded window of recent samples, capped by count and by age
//!
//! Aggregates (percentiles, error rate, top error types) are computed from the
//! window when [`MetricsCollector::snapshot`] is called, so recording stays O(1).
//!
//! One collector is built by the composition root and shared through `Arc`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// Error type recorded for calls that hit their timeout.
pub const TIMEOUT_ERROR: &str = "timeout";

const DEFAULT_WINDOW_CAPACITY: usize = 1000;
const DEFAULT_WINDOW_DURATION: Duration = Duration::from_secs(5 * 60);
const TOP_ERROR_TYPES: usize = 5;

/// A single recorded outcome.
#[derive(Debug, Clone)]
pub struct RequestMetric {
    pub operation: String,
    pub success: bool,
    pub latency: Duration,
    pub error_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    recorded_at: Instant,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    timeouts: AtomicU64,
    retries: AtomicU64,
}

impl Counters {
    fn clear(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.success.store(0, Ordering::Relaxed);
        self.failure.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
    }
}

/// Thread-safe collector of request outcomes.
pub struct MetricsCollector {
    counters: Counters,
    window: Mutex<VecDeque<RequestMetric>>,
    capacity: usize,
    max_age: Duration,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW_CAPACITY, DEFAULT_WINDOW_DURATION)
    }

    /// Create a collector with a custom window size and age limit.
    pub fn with_window(capacity: usize, max_age: Duration) -> Self {
        Self {
            counters: Counters::default(),
            window: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
            max_age,
        }
    }

    pub fn record_success(&self, operation: &str, latency: Duration) {
        self.push(operation, true, latency, None);
    }

    pub fn record_failure(&self, operation: &str, latency: Duration, error_type: &str) {
        self.push(operation, false, latency, Some(error_type));
    }

    /// Record a call that was abandoned at its deadline.
    ///
    /// Counted as a failure with error type [`TIMEOUT_ERROR`] and additionally
    /// in the timeout counter.
    pub fn record_timeout(&self, operation: &str, latency: Duration) {
        let mut window = self.lock_window();
        self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
        self.push_locked(&mut window, operation, false, latency, Some(TIMEOUT_ERROR));
    }

    pub fn record_retry(&self, operation: &str, attempt: u32) {
        {
            let _window = self.lock_window();
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(operation, attempt, "retrying outbound call");
    }

    /// Clear counters and the recent window.
    pub fn reset(&self) {
        // Recorders hold the window lock while bumping counters, so clearing
        // both under it leaves no half-recorded sample behind.
        let mut window = self.lock_window();
        window.clear();
        self.counters.clear();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples: Vec<RequestMetric> = {
            let mut window = self.lock_window();
            evict_expired(&mut window, self.max_age);
            window.iter().cloned().collect()
        };

        let total = self.counters.total.load(Ordering::Relaxed);
        let success = self.counters.success.load(Ordering::Relaxed);
        let failure = self.counters.failure.load(Ordering::Relaxed);

        let recent_failures = samples.iter().filter(|s| !s.success).count();
        let recent_error_rate = if samples.is_empty() {
            0.0
        } else {
            recent_failures as f64 / samples.len() as f64
        };

        MetricsSnapshot {
            total_requests: total,
            successful_requests: success,
            failed_requests: failure,
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            success_rate: if total == 0 {
                0.0
            } else {
                success as f64 / total as f64
            },
            recent_samples: samples.len(),
            recent_error_rate,
            latency: LatencyStats::from_samples(&samples),
            top_errors: top_error_types(&samples, TOP_ERROR_TYPES),
            operations: operation_breakdown(&samples),
            taken_at: Utc::now(),
        }
    }

    fn push(&self, operation: &str, success: bool, latency: Duration, error_type: Option<&str>) {
        let mut window = self.lock_window();
        self.push_locked(&mut window, operation, success, latency, error_type);
    }

    fn push_locked(
        &self,
        window: &mut VecDeque<RequestMetric>,
        operation: &str,
        success: bool,
        latency: Duration,
        error_type: Option<&str>,
    ) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.counters.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failure.fetch_add(1, Ordering::Relaxed);
        }

        window.push_back(RequestMetric {
            operation: operation.to_string(),
            success,
            latency,
            error_type: error_type.map(str::to_string),
            timestamp: Utc::now(),
            recorded_at: Instant::now(),
        });
        while window.len() > self.capacity {
            window.pop_front();
        }
    }

    fn lock_window(&self) -> std::sync::MutexGuard<'_, VecDeque<RequestMetric>> {
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn evict_expired(window: &mut VecDeque<RequestMetric>, max_age: Duration) {
    let now = Instant::now();
    while window
        .front()
        .is_some_and(|m| now.duration_since(m.recorded_at) > max_age)
    {
        window.pop_front();
    }
}

/// Aggregate view returned by [`MetricsCollector::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub success_rate: f64,
    pub recent_samples: usize,
    pub recent_error_rate: f64,
    pub latency: LatencyStats,
    pub top_errors: Vec<ErrorCount>,
    pub operations: Vec<OperationStats>,
    pub taken_at: DateTime<Utc>,
}

/// Latency statistics in milliseconds over the recent window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub min_ms: f64,
    pub max_ms: f64,
    pub average_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencyStats {
    fn from_samples(samples: &[RequestMetric]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut latencies: Vec<f64> = samples
            .iter()
            .map(|s| s.latency.as_secs_f64() * 1000.0)
            .collect();
        latencies.sort_by(|a, b| a.total_cmp(b));

        let sum: f64 = latencies.iter().sum();
        Self {
            min_ms: latencies[0],
            max_ms: latencies[latencies.len() - 1],
            average_ms: sum / latencies.len() as f64,
            p50_ms: percentile(&latencies, 50.0),
            p95_ms: percentile(&latencies, 95.0),
            p99_ms: percentile(&latencies, 99.0),
        }
    }
}

/// Nearest-rank percentile over an ascending slice.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (pct * n as f64 / 100.0).ceil() as i64 - 1;
    let index = rank.clamp(0, n as i64 - 1) as usize;
    sorted[index]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorCount {
    pub error_type: String,
    pub count: usize,
}

fn top_error_types(samples: &[RequestMetric], limit: usize) -> Vec<ErrorCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for sample in samples.iter().filter(|s| !s.success) {
        let key = sample.error_type.as_deref().unwrap_or("unknown");
        *counts.entry(key).or_default() += 1;
    }

    let mut ranked: Vec<ErrorCount> = counts
        .into_iter()
        .map(|(error_type, count)| ErrorCount {
            error_type: error_type.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then(a.error_type.cmp(&b.error_type)));
    ranked.truncate(limit);
    ranked
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationStats {
    pub operation: String,
    pub requests: usize,
    pub failures: usize,
    pub average_ms: f64,
}

fn operation_breakdown(samples: &[RequestMetric]) -> Vec<OperationStats> {
    let mut grouped: HashMap<&str, (usize, usize, f64)> = HashMap::new();
    for sample in samples {
        let entry = grouped.entry(sample.operation.as_str()).or_default();
        entry.0 += 1;
        if !sample.success {
            entry.1 += 1;
        }
        entry.2 += sample.latency.as_secs_f64() * 1000.0;
    }

    let mut stats: Vec<OperationStats> = grouped
        .into_iter()
        .map(|(operation, (requests, failures, total_ms))| OperationStats {
            operation: operation.to_string(),
            requests,
            failures,
            average_ms: total_ms / requests as f64,
        })
        .collect();
    stats.sort_by(|a, b| a.operation.cmp(&b.operation));
    stats
}
