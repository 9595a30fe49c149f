//! Tracing and telemetry instrumentation for fanout.
//!
//! Helper functions for creating tracing spans and recording metrics
//! around the dispatch lifecycle. All functions work both with and without
//! the `metrics` feature flag.
//!
//! # Example
//!
//! ```ignore
//! use fanout::telemetry::{dispatch_span, record_dispatch_start, record_dispatch_end};
//!
//! let span = dispatch_span("images", "process", 4);
//! let _enter = span.enter();
//! let timing = record_dispatch_start("images");
//! // ... wait for chunks
//! record_dispatch_end(timing, "process", 4);
//! ```

use std::future::Future;
use tracing::{info_span, Instrument, Span};

use crate::protocol::{LogLevel, LogRecord, OutcomeStatus};

/// Create a tracing span covering one dispatch cycle of a pool.
#[must_use]
pub fn dispatch_span(pool_id: impl AsRef<str>, pool_kind: impl AsRef<str>, chunks: usize) -> Span {
    info_span!(
        "fanout.dispatch",
        pool_id = %pool_id.as_ref(),
        pool_kind = %pool_kind.as_ref(),
        chunks = chunks,
    )
}

/// Create a tracing span for one chunk running inside a worker unit.
#[must_use]
pub fn chunk_span(pool_id: impl AsRef<str>, worker_index: usize, chunk_index: usize) -> Span {
    info_span!(
        "fanout.chunk",
        pool_id = %pool_id.as_ref(),
        worker_index = worker_index,
        chunk_index = chunk_index,
    )
}

/// Create a tracing span for an orchestrator run touching `pools` pools.
#[must_use]
pub fn run_span(pools: usize) -> Span {
    info_span!("fanout.run", pools = pools)
}

/// Instrument a future with a dispatch span.
pub fn instrument_dispatch<F>(
    pool_id: impl AsRef<str>,
    pool_kind: impl AsRef<str>,
    chunks: usize,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    future.instrument(dispatch_span(pool_id, pool_kind, chunks))
}

/// Forward a worker's log record to the host's subscriber.
///
/// Records are only forwarded when the pool runs in debug mode; otherwise
/// they are dropped.
pub fn forward_worker_log(pool_id: &str, worker_index: usize, record: &LogRecord, debug: bool) {
    if !debug {
        return;
    }
    match record.level {
        LogLevel::Trace => {
            tracing::trace!(target: "fanout::worker", pool_id, worker_index, params = %record.params, "{}", record.message)
        }
        LogLevel::Debug => {
            tracing::debug!(target: "fanout::worker", pool_id, worker_index, params = %record.params, "{}", record.message)
        }
        LogLevel::Info => {
            tracing::info!(target: "fanout::worker", pool_id, worker_index, params = %record.params, "{}", record.message)
        }
        LogLevel::Warn => {
            tracing::warn!(target: "fanout::worker", pool_id, worker_index, params = %record.params, "{}", record.message)
        }
        LogLevel::Error => {
            tracing::error!(target: "fanout::worker", pool_id, worker_index, params = %record.params, "{}", record.message)
        }
    }
}

/// Record the terminal outcome of one chunk.
pub fn record_chunk_outcome(
    pool_id: impl AsRef<str>,
    pool_kind: impl AsRef<str>,
    worker_index: usize,
    status: OutcomeStatus,
) {
    let status = match status {
        OutcomeStatus::Success => "success",
        OutcomeStatus::Failure => "failure",
    };
    tracing::debug!(
        pool_id = %pool_id.as_ref(),
        pool_kind = %pool_kind.as_ref(),
        worker_index = worker_index,
        status = status,
        "chunk settled"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_chunk_outcome(pool_id.as_ref(), pool_kind.as_ref(), status);
}

/// Record a worker unit that could not start or died before reporting.
pub fn record_worker_fault(
    pool_id: impl AsRef<str>,
    pool_kind: impl AsRef<str>,
    worker_index: usize,
    reason: impl AsRef<str>,
) {
    tracing::warn!(
        pool_id = %pool_id.as_ref(),
        pool_kind = %pool_kind.as_ref(),
        worker_index = worker_index,
        reason = %reason.as_ref(),
        "worker fault"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_worker_fault(pool_id.as_ref(), pool_kind.as_ref());
}

/// Record a disconnected process worker being replaced.
pub fn record_worker_respawn(pool_id: impl AsRef<str>, worker_index: usize) {
    tracing::info!(
        pool_id = %pool_id.as_ref(),
        worker_index = worker_index,
        "worker disconnected; respawning"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_worker_respawn(pool_id.as_ref());
}

/// Record the start of a dispatch for duration tracking.
///
/// Returns an opaque handle that should be passed to `record_dispatch_end`.
pub fn record_dispatch_start(pool_id: impl AsRef<str>) -> DispatchTimingHandle {
    DispatchTimingHandle {
        pool_id: pool_id.as_ref().to_string(),
        start: std::time::Instant::now(),
    }
}

/// Record the end of a dispatch and update duration metrics.
pub fn record_dispatch_end(handle: DispatchTimingHandle, pool_kind: impl AsRef<str>, chunks: usize) {
    let duration_secs = handle.start.elapsed().as_secs_f64();
    tracing::info!(
        pool_id = %handle.pool_id,
        pool_kind = %pool_kind.as_ref(),
        chunks = chunks,
        duration_secs = duration_secs,
        "dispatch settled"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_dispatch(&handle.pool_id, pool_kind.as_ref(), duration_secs);
}

/// Handle for tracking dispatch duration.
#[derive(Debug)]
pub struct DispatchTimingHandle {
    pool_id: String,
    start: std::time::Instant,
}

impl DispatchTimingHandle {
    #[must_use]
    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
