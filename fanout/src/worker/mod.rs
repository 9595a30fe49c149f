//! Worker unit runtime.
//!
//! Everything that runs inside an isolated execution unit: executing a
//! task against one chunk, the child-process serve loop, and the entry
//! artifact a child reads to find its task.

/// Worker entry artifact written by process pools.
pub mod artifact;
/// Serve loop for child worker processes.
pub mod child;

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::protocol::{ChunkResult, HostMessage};
use crate::task::{ErasedTask, TaskContext};

pub use artifact::{WorkerArtifact, WorkerManifest};
pub use child::{serve, serve_if_worker, ARTIFACT_ENV, WORKER_INDEX_ENV};

/// Run `task` against one chunk and turn whatever happens into a result.
///
/// Task errors and panics both become [`ChunkResult::Failure`]; nothing
/// escapes this boundary.
pub async fn execute_chunk(
    task: &dyn ErasedTask,
    message: HostMessage,
    ctx: TaskContext,
) -> ChunkResult {
    let call = task.call(message.items, message.params, &ctx);
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(payload)) => ChunkResult::Success(payload),
        Ok(Err(err)) => ChunkResult::Failure(format!("{err:#}")),
        Err(panic) => ChunkResult::Failure(format!("task panicked: {}", panic_message(&panic))),
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
