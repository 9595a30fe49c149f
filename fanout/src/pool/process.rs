use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};

use crate::config::{PoolConfig, PoolKind};
use crate::error::PoolError;
use crate::partition::{partition, Chunk};
use crate::protocol::{ChunkResult, HostMessage, Outcome, ResultSet, WorkerMessage};
use crate::task::TaskReference;
use crate::telemetry;
use crate::worker::{WorkerArtifact, ARTIFACT_ENV, WORKER_INDEX_ENV};

use super::{collect_outcome, WorkerPool};

/// How long a worker gets to exit on its own after its stdin closes.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Pool of resident child processes.
///
/// Each worker is a child running the configured worker program (the host
/// executable by default) with the artifact path in its environment. The
/// program must call [`serve_if_worker`](crate::worker::serve_if_worker)
/// with a registry containing the pool's task. Chunks go out as JSON lines
/// on the child's stdin; log records and the result come back on its
/// stdout.
///
/// A worker found disconnected at dispatch time is discarded and replaced
/// before its chunk is sent.
pub struct ProcessPool {
    id: String,
    config: PoolConfig,
    worker_count: usize,
    state: Mutex<ProcessState>,
}

#[derive(Default)]
struct ProcessState {
    artifact: Option<WorkerArtifact>,
    program: Option<PathBuf>,
    workers: Vec<Option<ProcessWorker>>,
    closed: bool,
}

impl fmt::Debug for ProcessPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let configured = self
            .state
            .try_lock()
            .map(|state| state.artifact.is_some())
            .unwrap_or(true);
        f.debug_struct("ProcessPool")
            .field("id", &self.id)
            .field("worker_count", &self.worker_count)
            .field("work_dir", &self.config.work_dir)
            .field("configured", &configured)
            .finish()
    }
}

impl ProcessPool {
    /// Create an unconfigured pool. No processes are started until
    /// [`WorkerPool::configure`].
    pub fn new(id: impl Into<String>, config: PoolConfig) -> Result<Self, PoolError> {
        let worker_count = config.worker_count()?;
        Ok(Self {
            id: id.into(),
            config,
            worker_count,
            state: Mutex::new(ProcessState::default()),
        })
    }

    /// OS process ids of the current workers, by worker index.
    pub async fn worker_pids(&self) -> Vec<Option<u32>> {
        let state = self.state.lock().await;
        state
            .workers
            .iter()
            .map(|slot| slot.as_ref().and_then(|worker| worker.child.id()))
            .collect()
    }

    /// Path of the worker entry artifact, once configured.
    pub async fn artifact_path(&self) -> Option<PathBuf> {
        let state = self.state.lock().await;
        state.artifact.as_ref().map(|artifact| artifact.path().to_path_buf())
    }

    fn spawn_worker(
        &self,
        index: usize,
        program: &Path,
        artifact: &Path,
    ) -> io::Result<ProcessWorker> {
        ProcessWorker::spawn(
            &self.id,
            index,
            program,
            &self.config.worker_args,
            artifact,
        )
    }

    /// Make sure the first `needed` workers are live, replacing any that
    /// have disconnected. Returns the fault for each worker that could not
    /// be brought up.
    async fn ensure_workers(&self, state: &mut ProcessState, needed: usize) -> Vec<Option<String>> {
        let mut faults = vec![None; needed];
        let (Some(program), Some(artifact)) = (state.program.clone(), state.artifact.as_ref()) else {
            return faults;
        };
        let artifact = artifact.path().to_path_buf();

        for (index, slot) in state.workers.iter_mut().enumerate().take(needed) {
            if slot.as_mut().is_some_and(ProcessWorker::is_connected) {
                continue;
            }
            if let Some(stale) = slot.take() {
                telemetry::record_worker_respawn(&self.id, index);
                stale.discard().await;
            }
            match self.spawn_worker(index, &program, &artifact) {
                Ok(worker) => *slot = Some(worker),
                Err(err) => faults[index] = Some(format!("worker #{index} failed to start: {err}")),
            }
        }
        faults
    }

    async fn run_chunks(
        &self,
        state: &mut ProcessState,
        chunks: Vec<Chunk<Value>>,
        params: Option<Value>,
    ) -> ResultSet {
        let needed = chunks.len();
        let faults = self.ensure_workers(state, needed).await;

        let pool_id = self.id.as_str();
        let kind = PoolKind::Process.as_str();
        let debug = self.config.debug;

        let pending = state
            .workers
            .iter_mut()
            .zip(chunks)
            .zip(faults)
            .enumerate()
            .map(|(worker_index, ((slot, chunk), fault))| {
                let message = HostMessage {
                    chunk_index: chunk.index,
                    items: chunk.items,
                    params: params.clone(),
                };
                async move {
                    let attempt = match (slot.as_mut(), fault) {
                        (_, Some(reason)) => Err(reason),
                        (Some(worker), None) => worker.run_chunk(pool_id, debug, &message).await,
                        (None, None) => Err(format!("worker #{worker_index} is not running")),
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

        let results: ResultSet = join_all(pending).await.into_iter().collect();

        if all_silent(&state.workers[..needed]) {
            let task = state
                .artifact
                .as_ref()
                .map(|artifact| artifact.manifest().task.as_str())
                .unwrap_or_default();
            tracing::warn!(
                pool_id = %self.id,
                task,
                workers = needed,
                "every worker exited before reporting a result; check that the worker program registers the task"
            );
        }
        results
    }
}

/// No worker in `workers` has reported a result since it was spawned.
fn all_silent(workers: &[Option<ProcessWorker>]) -> bool {
    workers
        .iter()
        .all(|slot| slot.as_ref().map_or(true, |worker| !worker.reported))
}

#[async_trait]
impl WorkerPool for ProcessPool {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> PoolKind {
        PoolKind::Process
    }

    fn worker_count(&self) -> usize {
        self.worker_count
    }

    async fn configure(&self, task: TaskReference) -> Result<(), PoolError> {
        let name = match task {
            TaskReference::Registered { name } => name,
            TaskReference::Inline(_) => {
                return Err(PoolError::Configuration(format!(
                    "process pool '{}' cannot run an inline task; register it by name",
                    self.id
                )))
            }
        };
        if name.trim().is_empty() {
            return Err(PoolError::Configuration(format!(
                "process pool '{}' was given an empty task name",
                self.id
            )));
        }

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(PoolError::Closed(self.id.clone()));
        }
        if state.artifact.is_some() {
            return Err(PoolError::Configuration(format!(
                "pool '{}' is already configured",
                self.id
            )));
        }

        let program = self.config.resolve_worker_program()?;
        let artifact =
            WorkerArtifact::materialize(&self.config.work_dir, &self.id, &name, self.config.debug)?;

        let mut workers = Vec::with_capacity(self.worker_count);
        for index in 0..self.worker_count {
            match self.spawn_worker(index, &program, artifact.path()) {
                Ok(worker) => workers.push(Some(worker)),
                Err(err) => {
                    // Retried on the next dispatch that needs this worker.
                    telemetry::record_worker_fault(
                        &self.id,
                        PoolKind::Process.as_str(),
                        index,
                        format!("failed to start: {err}"),
                    );
                    workers.push(None);
                }
            }
        }

        tracing::info!(
            pool_id = %self.id,
            task = %name,
            workers = self.worker_count,
            program = %program.display(),
            "process pool configured"
        );

        state.workers = workers;
        state.program = Some(program);
        state.artifact = Some(artifact);
        Ok(())
    }

    async fn dispatch(
        &self,
        batch: Vec<Value>,
        params: Option<Value>,
    ) -> Result<ResultSet, PoolError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(PoolError::Closed(self.id.clone()));
        }
        if state.artifact.is_none() {
            return Err(PoolError::NotConfigured(self.id.clone()));
        }

        let chunks = partition(batch, self.worker_count);
        if chunks.is_empty() {
            return Ok(ResultSet::new());
        }
        let chunk_count = chunks.len();

        let timing = telemetry::record_dispatch_start(&self.id);
        let results = telemetry::instrument_dispatch(
            &self.id,
            PoolKind::Process.as_str(),
            chunk_count,
            self.run_chunks(&mut state, chunks, params),
        )
        .await;
        telemetry::record_dispatch_end(timing, PoolKind::Process.as_str(), chunk_count);

        Ok(results)
    }

    async fn teardown(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;

        let workers: Vec<ProcessWorker> = state.workers.drain(..).flatten().collect();
        join_all(workers.into_iter().map(ProcessWorker::shutdown)).await;

        if let Some(artifact) = state.artifact.take() {
            if let Err(err) = artifact.remove() {
                tracing::warn!(pool_id = %self.id, error = %err, "failed to remove worker artifact");
            }
        }
        tracing::info!(pool_id = %self.id, "process pool torn down");
    }

    async fn live_workers(&self) -> usize {
        let mut state = self.state.lock().await;
        state
            .workers
            .iter_mut()
            .flatten()
            .map(ProcessWorker::is_connected)
            .filter(|connected| *connected)
            .count()
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        // Children die with their handles; only the artifact needs cleanup.
        if let Some(artifact) = self.state.get_mut().artifact.take() {
            let _ = artifact.remove();
        }
    }
}

/// One child process and the channel its stdout is parsed into.
struct ProcessWorker {
    index: usize,
    child: Child,
    stdin: Option<ChildStdin>,
    events: mpsc::UnboundedReceiver<WorkerMessage>,
    reader_done: Arc<AtomicBool>,
    /// A chunk was sent and its result has not been read yet. Still set if
    /// the dispatch waiting on it was dropped, in which case the result
    /// belongs to no one and the worker must be replaced.
    in_flight: bool,
    reported: bool,
}

impl ProcessWorker {
    fn spawn(
        pool_id: &str,
        index: usize,
        program: &Path,
        args: &[String],
        artifact: &Path,
    ) -> io::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .env(ARTIFACT_ENV, artifact)
            .env(WORKER_INDEX_ENV, index.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "child stdout not captured"))?;

        let (tx, events) = mpsc::unbounded_channel();
        let reader_done = Arc::new(AtomicBool::new(false));
        tokio::spawn(read_messages(
            pool_id.to_string(),
            index,
            stdout,
            tx,
            reader_done.clone(),
        ));

        tracing::debug!(pool_id, worker_index = index, pid = ?child.id(), "worker process started");
        Ok(Self {
            index,
            child,
            stdin,
            events,
            reader_done,
            in_flight: false,
            reported: false,
        })
    }

    /// The child is running, both pipes are still open and no abandoned
    /// chunk is pending.
    fn is_connected(&mut self) -> bool {
        !self.in_flight
            && self.stdin.is_some()
            && !self.reader_done.load(Ordering::Acquire)
            && matches!(self.child.try_wait(), Ok(None))
    }

    /// Send one chunk and wait for its result. `Err` carries the reason the
    /// worker faulted.
    async fn run_chunk(
        &mut self,
        pool_id: &str,
        debug: bool,
        message: &HostMessage,
    ) -> Result<ChunkResult, String> {
        let index = self.index;
        let mut line = serde_json::to_vec(message)
            .map_err(|err| format!("worker #{index} chunk could not be encoded: {err}"))?;
        line.push(b'\n');

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(format!("worker #{index} input is closed"));
        };
        self.in_flight = true;
        let sent = match stdin.write_all(&line).await {
            Ok(()) => stdin.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = sent {
            self.stdin = None;
            return Err(format!("worker #{index} could not receive its chunk: {err}"));
        }

        match collect_outcome(pool_id, index, debug, &mut self.events).await {
            Some(result) => {
                self.in_flight = false;
                self.reported = true;
                Ok(result)
            }
            None => {
                self.stdin = None;
                let status = match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
                    Ok(Ok(status)) => describe_exit(status),
                    Ok(Err(err)) => format!("status unavailable: {err}"),
                    Err(_) => "output closed".to_string(),
                };
                Err(format!(
                    "worker #{index} exited ({status}) before reporting an outcome"
                ))
            }
        }
    }

    /// Close stdin and give the child a moment to exit before killing it.
    async fn shutdown(mut self) {
        drop(self.stdin.take());
        if tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait())
            .await
            .is_err()
        {
            let _ = self.child.kill().await;
        }
    }

    /// Kill a worker that is being replaced.
    async fn discard(mut self) {
        drop(self.stdin.take());
        let _ = self.child.kill().await;
    }
}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => status.to_string(),
    }
}

async fn read_messages(
    pool_id: String,
    worker_index: usize,
    stdout: ChildStdout,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    done: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WorkerMessage>(&line) {
                    Ok(message) => {
                        if tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(_) => tracing::debug!(
                        pool_id = %pool_id,
                        worker_index,
                        line = %line,
                        "ignoring non-protocol worker output"
                    ),
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(pool_id = %pool_id, worker_index, error = %err, "worker output read failed");
                break;
            }
        }
    }
    done.store(true, Ordering::Release);
}
