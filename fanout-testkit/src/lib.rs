//! Test support for fanout: reference tasks, a scriptable mock pool, and
//! the `fanout-test-worker` binary used as the child program in
//! process-pool tests.

pub mod mock;
pub mod task;

pub use mock::{DispatchRecord, MockPool};
pub use task::*;

/// Install a stderr `tracing` subscriber honouring `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops. Output goes to
/// stderr because a child worker's stdout carries the protocol.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
