//! Process-wide performance metrics for the tree-query service.
//!
//! Lightweight in-memory counters and timing histograms exposed via `/stats`
//! and logged periodically. Mirrors the lock-free-counters-plus-DashMap-
//! histogram shape the teacher uses for its LSP metrics, retargeted at this
//! service's operations (parse, query execution, predicate/directive
//! processing, the per-request regex cache).
//!
//! ## Design
//!
//! - Lock-free atomic counters for high-frequency operations
//! - DashMap for low-contention histogram storage
//! - Minimal overhead (~10-20ns per metric update)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

/// Global metrics registry (singleton)
static METRICS: once_cell::sync::Lazy<Arc<Metrics>> = once_cell::sync::Lazy::new(|| {
    Arc::new(Metrics::new())
});

/// Get the global metrics instance
pub fn metrics() -> &'static Arc<Metrics> {
    &METRICS
}

/// Performance metrics registry
#[derive(Debug)]
pub struct Metrics {
    // Regex cache metrics (per-request cache, §9 design notes)
    regex_cache_hits: AtomicU64,
    regex_cache_misses: AtomicU64,

    // Compiled-query cache metrics (process-lifetime cache)
    query_cache_hits: AtomicU64,
    query_cache_misses: AtomicU64,

    // Request-level counters
    request_count: AtomicU64,
    error_count: AtomicU64,
    cleanup_count: AtomicU64,

    // Pipeline counters
    predicates_processed: AtomicU64,
    directives_applied: AtomicU64,
    matches_produced: AtomicU64,

    // Timing histograms (operation name -> list of durations in microseconds)
    operation_timings: DashMap<String, Vec<u64>>,

    // Error counters by kind
    parse_errors: AtomicU64,
    validation_errors: AtomicU64,
}

impl Metrics {
    /// Creates a new metrics registry
    pub fn new() -> Self {
        Self {
            regex_cache_hits: AtomicU64::new(0),
            regex_cache_misses: AtomicU64::new(0),
            query_cache_hits: AtomicU64::new(0),
            query_cache_misses: AtomicU64::new(0),
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            cleanup_count: AtomicU64::new(0),
            predicates_processed: AtomicU64::new(0),
            directives_applied: AtomicU64::new(0),
            matches_produced: AtomicU64::new(0),
            operation_timings: DashMap::new(),
            parse_errors: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
        }
    }

    pub fn record_regex_cache_hit(&self) {
        self.regex_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_regex_cache_miss(&self) {
        self.regex_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Regex cache hit rate (0.0 to 1.0)
    pub fn regex_cache_hit_rate(&self) -> f64 {
        let hits = self.regex_cache_hits.load(Ordering::Relaxed);
        let misses = self.regex_cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Records a compiled-query cache lookup (`hit` = served from cache).
    pub fn record_query_cache_lookup(&self, hit: bool) {
        if hit {
            self.query_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.query_cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Compiled-query cache hit rate (0.0 to 1.0)
    pub fn query_cache_hit_rate(&self) -> f64 {
        let hits = self.query_cache_hits.load(Ordering::Relaxed);
        let misses = self.query_cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn record_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cleanup(&self) {
        self.cleanup_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_predicates_processed(&self, count: usize) {
        self.predicates_processed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_directives_applied(&self, count: usize) {
        self.directives_applied.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_matches_produced(&self, count: usize) {
        self.matches_produced.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records the timing of an operation
    ///
    /// # Arguments
    /// * `operation` - Name of the operation (e.g., "parse", "query_execute")
    /// * `duration` - Duration of the operation
    pub fn record_timing(&self, operation: &str, duration: Duration) {
        let micros = duration.as_micros() as u64;

        self.operation_timings
            .entry(operation.to_string())
            .or_insert_with(Vec::new)
            .push(micros);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_error(&self) {
        self.validation_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets summary statistics for an operation
    pub fn operation_stats(&self, operation: &str) -> Option<OperationStats> {
        self.operation_timings.get(operation).map(|timings| {
            let mut sorted = timings.value().clone();
            sorted.sort_unstable();

            let count = sorted.len();
            if count == 0 {
                return OperationStats {
                    count: 0,
                    min_micros: 0,
                    max_micros: 0,
                    mean_micros: 0,
                    p50_micros: 0,
                    p95_micros: 0,
                    p99_micros: 0,
                };
            }

            let sum: u64 = sorted.iter().sum();
            let mean = sum / count as u64;

            let p50_idx = count / 2;
            let p95_idx = (count as f64 * 0.95) as usize;
            let p99_idx = (count as f64 * 0.99) as usize;

            OperationStats {
                count,
                min_micros: sorted[0],
                max_micros: sorted[count - 1],
                mean_micros: mean,
                p50_micros: sorted[p50_idx],
                p95_micros: sorted[p95_idx.min(count - 1)],
                p99_micros: sorted[p99_idx.min(count - 1)],
            }
        })
    }

    /// Gets a summary report of all metrics
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            regex_cache_hits: self.regex_cache_hits.load(Ordering::Relaxed),
            regex_cache_misses: self.regex_cache_misses.load(Ordering::Relaxed),
            regex_cache_hit_rate: self.regex_cache_hit_rate(),
            query_cache_hits: self.query_cache_hits.load(Ordering::Relaxed),
            query_cache_misses: self.query_cache_misses.load(Ordering::Relaxed),
            query_cache_hit_rate: self.query_cache_hit_rate(),
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            cleanup_count: self.cleanup_count.load(Ordering::Relaxed),
            predicates_processed: self.predicates_processed.load(Ordering::Relaxed),
            directives_applied: self.directives_applied.load(Ordering::Relaxed),
            matches_produced: self.matches_produced.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
        }
    }

    /// Resets all metrics (useful for testing)
    pub fn reset(&self) {
        self.regex_cache_hits.store(0, Ordering::Relaxed);
        self.regex_cache_misses.store(0, Ordering::Relaxed);
        self.query_cache_hits.store(0, Ordering::Relaxed);
        self.query_cache_misses.store(0, Ordering::Relaxed);
        self.request_count.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        self.cleanup_count.store(0, Ordering::Relaxed);
        self.predicates_processed.store(0, Ordering::Relaxed);
        self.directives_applied.store(0, Ordering::Relaxed);
        self.matches_produced.store(0, Ordering::Relaxed);
        self.operation_timings.clear();
        self.parse_errors.store(0, Ordering::Relaxed);
        self.validation_errors.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for a single operation
#[derive(Debug, Clone)]
pub struct OperationStats {
    pub count: usize,
    pub min_micros: u64,
    pub max_micros: u64,
    pub mean_micros: u64,
    pub p50_micros: u64,  // Median
    pub p95_micros: u64,
    pub p99_micros: u64,
}

/// Summary of all metrics
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub regex_cache_hits: u64,
    pub regex_cache_misses: u64,
    pub regex_cache_hit_rate: f64,
    pub query_cache_hits: u64,
    pub query_cache_misses: u64,
    pub query_cache_hit_rate: f64,
    pub request_count: u64,
    pub error_count: u64,
    pub cleanup_count: u64,
    pub predicates_processed: u64,
    pub directives_applied: u64,
    pub matches_produced: u64,
    pub parse_errors: u64,
    pub validation_errors: u64,
}

/// RAII guard for automatic timing measurement
///
/// Records the duration of a scope when dropped.
pub struct TimingGuard {
    operation: String,
    start: Instant,
}

impl TimingGuard {
    /// Creates a new timing guard for the given operation
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        metrics().record_timing(&self.operation, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn regex_cache_metrics_compute_hit_rate() {
        let m = Metrics::new();

        assert_eq!(m.regex_cache_hit_rate(), 0.0);

        m.record_regex_cache_hit();
        m.record_regex_cache_hit();
        m.record_regex_cache_miss();

        assert_eq!(m.regex_cache_hit_rate(), 2.0 / 3.0);
    }

    #[test]
    fn request_counters_track_summary() {
        let m = Metrics::new();

        m.record_request();
        m.record_request();
        m.record_error();

        let summary = m.summary();
        assert_eq!(summary.request_count, 2);
        assert_eq!(summary.error_count, 1);
    }

    #[test]
    fn operation_timing_computes_percentiles() {
        let m = Metrics::new();

        m.record_timing("query_execute", Duration::from_micros(100));
        m.record_timing("query_execute", Duration::from_micros(200));
        m.record_timing("query_execute", Duration::from_micros(150));

        let stats = m.operation_stats("query_execute").unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min_micros, 100);
        assert_eq!(stats.max_micros, 200);
        assert_eq!(stats.mean_micros, 150);
        assert_eq!(stats.p50_micros, 150);
    }

    #[test]
    fn timing_guard_records_on_drop() {
        let m = Metrics::new();

        {
            let _guard = TimingGuard::new("test_guard");
            thread::sleep(Duration::from_millis(10));
        }

        let stats = metrics().operation_stats("test_guard").unwrap();
        assert_eq!(stats.count, 1);
        assert!(stats.min_micros >= 10_000); // At least 10ms

        let _ = m; // keep local registry alive for the hit-rate assertions above
    }

    #[test]
    fn reset_clears_all_counters() {
        let m = Metrics::new();

        m.record_regex_cache_hit();
        m.record_request();
        m.record_timing("test", Duration::from_micros(100));

        m.reset();

        let summary = m.summary();
        assert_eq!(summary.regex_cache_hits, 0);
        assert_eq!(summary.request_count, 0);
        assert!(m.operation_stats("test").is_none());
    }
}
