//! Worker pools.
//!
//! A pool owns a fixed number of isolated worker units, binds them to one
//! task, and fans each dispatched batch out across them. Two backends are
//! provided: [`ProcessPool`] keeps resident child processes and
//! [`ThreadPool`] spawns one OS thread per chunk.

/// Pool backed by resident child processes.
pub mod process;
/// Pool backed by per-dispatch OS threads.
pub mod thread;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::{PoolConfig, PoolKind};
use crate::error::PoolError;
use crate::protocol::{ChunkResult, ResultSet, WorkerMessage};
use crate::task::{TaskReference, TaskRegistry};
use crate::telemetry;

pub use process::ProcessPool;
pub use thread::ThreadPool;

/// A fixed set of worker units bound to one task.
///
/// Implementations serialize their own dispatches: a second `dispatch`
/// issued while one is in flight waits for it to settle.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Identifier the pool is registered under.
    fn id(&self) -> &str;

    fn kind(&self) -> PoolKind;

    /// Number of worker units, fixed at construction.
    fn worker_count(&self) -> usize;

    /// Bind the pool to `task` and bring its workers up.
    ///
    /// A pool can be configured once; a second call is a configuration
    /// error.
    async fn configure(&self, task: TaskReference) -> Result<(), PoolError>;

    /// Partition `batch` across the workers and wait for every chunk to
    /// settle.
    ///
    /// Task failures and worker faults land in [`ResultSet::failures`]; the
    /// only errors are an unconfigured or torn-down pool.
    async fn dispatch(&self, batch: Vec<Value>, params: Option<Value>)
        -> Result<ResultSet, PoolError>;

    /// Stop all workers and release the pool's resources. Idempotent.
    async fn teardown(&self);

    /// Number of worker units currently alive.
    async fn live_workers(&self) -> usize;
}

/// Construct an unconfigured pool of the kind named by `config`.
///
/// `registry` is consulted by thread pools to resolve registered task
/// names; process pools resolve names inside the child instead.
pub fn build_pool(
    id: impl Into<String>,
    config: PoolConfig,
    registry: Arc<TaskRegistry>,
) -> Result<Box<dyn WorkerPool>, PoolError> {
    let pool: Box<dyn WorkerPool> = match config.kind {
        PoolKind::Process => Box::new(ProcessPool::new(id, config)?),
        PoolKind::Thread => Box::new(ThreadPool::new(id, config, registry)?),
    };
    Ok(pool)
}

/// Read worker messages until the terminal result for the current chunk.
///
/// Log records are forwarded on the way. Returns `None` when the channel
/// closes first, which means the worker went away mid-chunk.
pub(crate) async fn collect_outcome(
    pool_id: &str,
    worker_index: usize,
    debug: bool,
    rx: &mut mpsc::UnboundedReceiver<WorkerMessage>,
) -> Option<ChunkResult> {
    while let Some(message) = rx.recv().await {
        match message {
            WorkerMessage::Log(record) => {
                telemetry::forward_worker_log(pool_id, worker_index, &record, debug)
            }
            result => return result.into_result(),
        }
    }
    None
}
