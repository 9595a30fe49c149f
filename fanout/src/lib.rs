//! Fanout - parallel batch execution across isolated worker pools.
//!
//! Splits a batch of items across a fixed pool of worker units (child
//! processes or OS threads), runs one task on every chunk, and folds the
//! results into a single [`ResultSet`]. A failing chunk never aborts the
//! batch: task errors, panics and dead workers each become one entry in
//! [`ResultSet::failures`].
//!
//! # Core Concepts
//!
//! - **Task**: user code implementing [`BatchTask`] (or a closure wrapped in
//!   [`FnTask`]). Tasks are registered by name in a [`TaskRegistry`] so that
//!   child processes can find them, or handed to thread pools inline.
//!
//! - **Pool**: the [`WorkerPool`] trait with [`ProcessPool`] and
//!   [`ThreadPool`] backends. A pool is bound to one task and partitions
//!   every dispatched batch across its workers.
//!
//! - **Orchestrator**: [`Orchestrator`] holds several independently
//!   configured pools and routes [`RunRequest`]s to them by id.
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use fanout::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = TaskRegistry::new().register("sum", SumTask);
//!     // Child workers re-enter here and never return past this point.
//!     if worker::serve_if_worker(&registry).await? {
//!         return Ok(());
//!     }
//!
//!     let orchestrator =
//!         Orchestrator::single(PoolConfig::process().with_size(4), TaskReference::registered("sum"))
//!             .await?;
//!     let results = orchestrator.run_batch((0..100).map(Into::into).collect(), None).await?;
//!     println!("{:?}", results.responses);
//!     orchestrator.teardown(None).await;
//!     Ok(())
//! }
//! ```

/// Pool configuration.
///
/// [`PoolConfig`] with its [`PoolKind`] and [`PoolSize`], loadable from JSON.
pub mod config;

/// Error type shared by pools and the orchestrator.
pub mod error;

#[cfg(feature = "metrics")]
/// Prometheus metrics for dispatches, chunk outcomes and worker faults.
pub mod metrics;

/// Batch partitioning into per-worker chunks.
pub mod partition;

/// Worker pools and their process and thread backends.
pub mod pool;

/// Host/worker messages and aggregated results.
pub mod protocol;

/// Multi-pool orchestration.
///
/// - [`Orchestrator`] - routes requests to pools by id
/// - [`OrchestratorBuilder`] - constructs and configures pools
/// - [`RunRequest`] / [`RunResponse`] - request and result shapes
pub mod runtime;

/// Task traits, registry and per-chunk context.
pub mod task;

/// Tracing spans and metric hooks.
pub mod telemetry;

/// Code that runs inside worker units.
pub mod worker;

pub use config::*;
pub use error::*;
pub use partition::*;
pub use pool::*;
pub use protocol::*;
pub use runtime::*;
pub use task::*;
