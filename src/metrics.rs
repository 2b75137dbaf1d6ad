//! Prometheus metrics for the rollup engine
//!
//! Counters and histograms are registered in the default registry on
//! first use. [`gather_metrics`] renders them in the text format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    // === Upsert ===

    /// Stored rows touched by upserts
    pub static ref UPSERT_ROWS_TOTAL: CounterVec = register_counter_vec!(
        "rollup_upsert_rows_total",
        "Stored rows touched by upsert batches",
        &["operation", "outcome"]
    ).unwrap();

    /// Upsert batch duration
    pub static ref UPSERT_DURATION: HistogramVec = register_histogram_vec!(
        "rollup_upsert_duration_seconds",
        "Upsert batch latency in seconds",
        &["operation"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // === Fetch ===

    /// Fetches by plan mode and status
    pub static ref FETCHES_TOTAL: CounterVec = register_counter_vec!(
        "rollup_fetches_total",
        "Fetch requests executed",
        &["mode", "status"]
    ).unwrap();

    /// Fetch duration
    pub static ref FETCH_DURATION: HistogramVec = register_histogram_vec!(
        "rollup_fetch_duration_seconds",
        "Fetch latency in seconds",
        &["mode"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    /// Shard tasks by dispatch strategy and status
    pub static ref SHARD_TASKS_TOTAL: CounterVec = register_counter_vec!(
        "rollup_shard_tasks_total",
        "Shard statements dispatched into temp tables",
        &["strategy", "status"]
    ).unwrap();

    // === Cache ===

    /// Cache lookups by result
    pub static ref CACHE_LOOKUPS_TOTAL: CounterVec = register_counter_vec!(
        "rollup_cache_lookups_total",
        "Fetch cache lookups",
        &["result"]
    ).unwrap();

    // === Engine ===

    /// Worker pool size (0 for serial dispatch)
    pub static ref DISPATCH_WORKERS: Gauge = register_gauge!(
        "rollup_dispatch_workers",
        "Workers in the shard dispatch pool"
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record one stored row written by an upsert
#[inline]
pub fn record_upsert_row(operation: &str, outcome: &str) {
    UPSERT_ROWS_TOTAL.with_label_values(&[operation, outcome]).inc();
}

/// Record a completed upsert batch
#[inline]
pub fn record_upsert_batch(operation: &str, duration_secs: f64) {
    UPSERT_DURATION.with_label_values(&[operation]).observe(duration_secs);
}

/// Record a fetch
#[inline]
pub fn record_fetch(mode: &str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "error" };
    FETCHES_TOTAL.with_label_values(&[mode, status]).inc();
    FETCH_DURATION.with_label_values(&[mode]).observe(duration_secs);
}

/// Record dispatched shard statements
#[inline]
pub fn record_shard_tasks(strategy: &str, total: usize, failed: usize) {
    let failed = failed.min(total);
    SHARD_TASKS_TOTAL
        .with_label_values(&[strategy, "success"])
        .inc_by((total - failed) as f64);
    SHARD_TASKS_TOTAL
        .with_label_values(&[strategy, "error"])
        .inc_by(failed as f64);
}

/// Record a cache lookup (`hit`, `miss` or `error`)
#[inline]
pub fn record_cache_lookup(result: &str) {
    CACHE_LOOKUPS_TOTAL.with_label_values(&[result]).inc();
}

/// Set the dispatch pool size
#[inline]
pub fn set_dispatch_workers(workers: usize) {
    DISPATCH_WORKERS.set(workers as f64);
}
