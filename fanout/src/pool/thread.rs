use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::Instrument;

use crate::config::{PoolConfig, PoolKind};
use crate::error::PoolError;
use crate::partition::{partition, Chunk};
use crate::protocol::{ChunkResult, HostMessage, Outcome, ResultSet, WorkerMessage};
use crate::task::{ErasedTask, LogSink, TaskContext, TaskReference, TaskRegistry};
use crate::telemetry;
use crate::worker::execute_chunk;

use super::{collect_outcome, WorkerPool};

/// Pool that runs each chunk on a fresh OS thread.
///
/// Threads are spawned per dispatch with their chunk as start-up payload
/// and exit once they have reported, so between dispatches the pool holds
/// no live workers. Registered task names are resolved in the host's
/// registry; inline tasks are used as given.
pub struct ThreadPool {
    id: String,
    config: PoolConfig,
    worker_count: usize,
    registry: Arc<TaskRegistry>,
    state: Mutex<ThreadState>,
    active: Arc<AtomicUsize>,
}

#[derive(Default)]
struct ThreadState {
    task: Option<Arc<dyn ErasedTask>>,
    closed: bool,
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("id", &self.id)
            .field("worker_count", &self.worker_count)
            .field("registry", &self.registry)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

impl ThreadPool {
    pub fn new(
        id: impl Into<String>,
        config: PoolConfig,
        registry: Arc<TaskRegistry>,
    ) -> Result<Self, PoolError> {
        let worker_count = config.worker_count()?;
        Ok(Self {
            id: id.into(),
            config,
            worker_count,
            registry,
            state: Mutex::new(ThreadState::default()),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    async fn run_chunks(
        &self,
        task: Arc<dyn ErasedTask>,
        chunks: Vec<Chunk<Value>>,
        params: Option<Value>,
    ) -> ResultSet {
        let pool_id = self.id.as_str();
        let kind = PoolKind::Thread.as_str();
        let debug = self.config.debug;

        let pending = chunks.into_iter().map(|chunk| {
            let worker_index = chunk.index;
            let message = HostMessage {
                chunk_index: chunk.index,
                items: chunk.items,
                params: params.clone(),
            };
            let spawned = self.spawn_unit(task.clone(), worker_index, message);
            async move {
                let attempt = match spawned {
                    Ok(mut rx) => collect_outcome(pool_id, worker_index, debug, &mut rx)
                        .await
                        .ok_or_else(|| {
                            format!(
                                "worker thread #{worker_index} terminated before reporting an outcome"
                            )
                        }),
                    Err(reason) => Err(reason),
                };
                let result = attempt.unwrap_or_else(|reason| {
                    telemetry::record_worker_fault(pool_id, kind, worker_index, &reason);
                    ChunkResult::Failure(reason)
                });
                telemetry::record_chunk_outcome(pool_id, kind, worker_index, result.status());
                Outcome {
                    worker_index,
                    result,
                }
            }
        });

        join_all(pending).await.into_iter().collect()
    }

    /// Start the thread for one chunk. The receiver yields its log records
    /// and then its result.
    fn spawn_unit(
        &self,
        task: Arc<dyn ErasedTask>,
        worker_index: usize,
        message: HostMessage,
    ) -> Result<mpsc::UnboundedReceiver<WorkerMessage>, String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = TaskContext::new(
            self.id.clone(),
            worker_index,
            message.chunk_index,
            LogSink::new(tx.clone()),
        );
        let span = telemetry::chunk_span(&self.id, worker_index, message.chunk_index);
        let guard = ActiveUnit::enter(self.active.clone());

        std::thread::Builder::new()
            .name(format!("{}-t{worker_index}", self.id))
            .spawn(move || {
                let _guard = guard;
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let failure =
                            ChunkResult::Failure(format!("worker thread runtime failed: {err}"));
                        let _ = tx.send(WorkerMessage::from_result(failure));
                        return;
                    }
                };
                let result =
                    runtime.block_on(execute_chunk(task.as_ref(), message, ctx).instrument(span));
                let _ = tx.send(WorkerMessage::from_result(result));
            })
            .map(|_| rx)
            .map_err(|err| format!("worker thread #{worker_index} failed to start: {err}"))
    }
}

#[async_trait]
impl WorkerPool for ThreadPool {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> PoolKind {
        PoolKind::Thread
    }

    fn worker_count(&self) -> usize {
        self.worker_count
    }

    async fn configure(&self, task: TaskReference) -> Result<(), PoolError> {
        let label = task.label().to_string();
        let resolved = match task {
            TaskReference::Inline(task) => task,
            TaskReference::Registered { name } => self.registry.get(&name).ok_or_else(|| {
                PoolError::Configuration(format!(
                    "task '{name}' is not registered (known: {:?})",
                    self.registry.names()
                ))
            })?,
        };

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(PoolError::Closed(self.id.clone()));
        }
        if state.task.is_some() {
            return Err(PoolError::Configuration(format!(
                "pool '{}' is already configured",
                self.id
            )));
        }
        state.task = Some(resolved);

        tracing::info!(
            pool_id = %self.id,
            task = %label,
            workers = self.worker_count,
            "thread pool configured"
        );
        Ok(())
    }

    async fn dispatch(
        &self,
        batch: Vec<Value>,
        params: Option<Value>,
    ) -> Result<ResultSet, PoolError> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(PoolError::Closed(self.id.clone()));
        }
        let Some(task) = state.task.clone() else {
            return Err(PoolError::NotConfigured(self.id.clone()));
        };

        let chunks = partition(batch, self.worker_count);
        if chunks.is_empty() {
            return Ok(ResultSet::new());
        }
        let chunk_count = chunks.len();

        let timing = telemetry::record_dispatch_start(&self.id);
        let results = telemetry::instrument_dispatch(
            &self.id,
            PoolKind::Thread.as_str(),
            chunk_count,
            self.run_chunks(task, chunks, params),
        )
        .await;
        telemetry::record_dispatch_end(timing, PoolKind::Thread.as_str(), chunk_count);

        // Held until here so dispatches never interleave.
        drop(state);
        Ok(results)
    }

    async fn teardown(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        state.task = None;
        tracing::info!(pool_id = %self.id, "thread pool torn down");
    }

    async fn live_workers(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Counts a worker thread as live until it finishes.
struct ActiveUnit(Arc<AtomicUsize>);

impl ActiveUnit {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ActiveUnit {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
