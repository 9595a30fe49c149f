//! Prometheus metrics instrumentation for fanout.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `fanout_dispatches_total` - Total number of settled dispatches
//! - `fanout_chunk_outcomes_total` - Chunk outcomes by status
//! - `fanout_worker_faults_total` - Worker units that failed to start or died mid-chunk
//! - `fanout_worker_respawns_total` - Disconnected process workers replaced
//!
//! ## Histograms
//! - `fanout_dispatch_duration_seconds` - Wall time from dispatch to last outcome
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for fanout metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter for settled dispatches.
///
/// Labels:
/// - `pool_id`: The pool identifier
/// - `pool_kind`: `process` or `thread`
pub static DISPATCHES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("fanout_dispatches_total", "Total number of settled dispatches");
    CounterVec::new(opts, &["pool_id", "pool_kind"])
        .expect("fanout_dispatches_total metric creation failed")
});

/// Counter for chunk outcomes.
///
/// Labels:
/// - `pool_id`: The pool identifier
/// - `pool_kind`: `process` or `thread`
/// - `status`: `success` or `failure`
pub static CHUNK_OUTCOMES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("fanout_chunk_outcomes_total", "Chunk outcomes by status");
    CounterVec::new(opts, &["pool_id", "pool_kind", "status"])
        .expect("fanout_chunk_outcomes_total metric creation failed")
});

/// Counter for worker faults.
pub static WORKER_FAULTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "fanout_worker_faults_total",
        "Worker units that failed to start or died before reporting",
    );
    CounterVec::new(opts, &["pool_id", "pool_kind"])
        .expect("fanout_worker_faults_total metric creation failed")
});

/// Counter for respawned process workers.
pub static WORKER_RESPAWNS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "fanout_worker_respawns_total",
        "Disconnected process workers replaced at dispatch time",
    );
    CounterVec::new(opts, &["pool_id"]).expect("fanout_worker_respawns_total metric creation failed")
});

/// Histogram for dispatch duration in seconds.
pub static DISPATCH_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "fanout_dispatch_duration_seconds",
        "Wall time from dispatch to the last chunk outcome",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["pool_id", "pool_kind"])
        .expect("fanout_dispatch_duration_seconds metric creation failed")
});

/// Register all metrics with the global registry.
///
/// Idempotent.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(DISPATCHES_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(CHUNK_OUTCOMES_TOTAL.clone()),
        Box::new(WORKER_FAULTS_TOTAL.clone()),
        Box::new(WORKER_RESPAWNS_TOTAL.clone()),
        Box::new(DISPATCH_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_chunk_outcome(pool_id: &str, pool_kind: &str, status: &str) {
    CHUNK_OUTCOMES_TOTAL
        .with_label_values(&[pool_id, pool_kind, status])
        .inc();
}

pub fn record_worker_fault(pool_id: &str, pool_kind: &str) {
    WORKER_FAULTS_TOTAL
        .with_label_values(&[pool_id, pool_kind])
        .inc();
}

pub fn record_worker_respawn(pool_id: &str) {
    WORKER_RESPAWNS_TOTAL.with_label_values(&[pool_id]).inc();
}

/// Count a settled dispatch and observe its duration.
pub fn observe_dispatch(pool_id: &str, pool_kind: &str, duration_secs: f64) {
    DISPATCHES_TOTAL
        .with_label_values(&[pool_id, pool_kind])
        .inc();
    DISPATCH_DURATION_SECONDS
        .with_label_values(&[pool_id, pool_kind])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics().expect("metrics initialization should succeed");
        init_metrics().expect("second initialization should be a no-op");
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().expect("metrics initialization should succeed");

        observe_dispatch("test_pool", "thread", 0.25);
        record_chunk_outcome("test_pool", "thread", "success");
        record_worker_fault("test_pool", "process");
        record_worker_respawn("test_pool");

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("fanout_dispatches_total"));
        assert!(output.contains("fanout_chunk_outcomes_total"));
        assert!(output.contains("fanout_worker_respawns_total"));
    }
}
