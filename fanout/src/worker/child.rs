use std::path::Path;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::protocol::{ChunkResult, HostMessage, WorkerMessage};
use crate::task::{LogSink, TaskContext, TaskRegistry};
use crate::telemetry;

use super::artifact::WorkerArtifact;
use super::execute_chunk;

/// Environment variable carrying the artifact path to a child worker.
pub const ARTIFACT_ENV: &str = "FANOUT_WORKER_ARTIFACT";
/// Environment variable carrying the child's worker index.
pub const WORKER_INDEX_ENV: &str = "FANOUT_WORKER_INDEX";

/// Serve as a pool worker if this process was spawned as one.
///
/// Call this first thing in `main` of any program used as a process-pool
/// worker (by default the host program itself). Returns `Ok(false)`
/// immediately in a normal process. In a worker process it serves chunks
/// from stdin until the pool closes the pipe and then returns `Ok(true)`;
/// the caller should exit.
///
/// ```ignore
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let registry = TaskRegistry::new().register("sum", SumTask);
///     if fanout::worker::serve_if_worker(&registry).await? {
///         return Ok(());
///     }
///     // host logic
/// }
/// ```
pub async fn serve_if_worker(registry: &TaskRegistry) -> anyhow::Result<bool> {
    let Some(artifact) = std::env::var_os(ARTIFACT_ENV) else {
        return Ok(false);
    };
    let worker_index = match std::env::var(WORKER_INDEX_ENV) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid {WORKER_INDEX_ENV} value '{raw}'"))?,
        Err(_) => 0,
    };

    serve(
        registry,
        Path::new(&artifact),
        worker_index,
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await?;
    Ok(true)
}

/// Load the task named by the artifact and answer dispatch messages read
/// from `reader` until it reaches EOF.
///
/// Every message line gets exactly one result line on `writer`, preceded by
/// the task's log lines when the artifact has `debug` set. Fails before
/// reading anything if the artifact cannot be read or names a task missing
/// from `registry`.
pub async fn serve<R, W>(
    registry: &TaskRegistry,
    artifact: &Path,
    worker_index: usize,
    reader: R,
    writer: W,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let manifest = WorkerArtifact::load(artifact)?;
    let task = registry.get(&manifest.task).with_context(|| {
        format!(
            "task '{}' is not registered in this worker (known: {:?})",
            manifest.task,
            registry.names()
        )
    })?;

    tracing::debug!(
        pool_id = %manifest.pool_id,
        worker_index,
        task = %manifest.task,
        "worker ready"
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let output = tokio::spawn(write_messages(rx, writer));

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let message: HostMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(err) => {
                // Still answer, otherwise the pool waits on this chunk forever.
                let failure = ChunkResult::Failure(format!("malformed dispatch message: {err}"));
                let _ = tx.send(WorkerMessage::from_result(failure));
                continue;
            }
        };

        // Worker logs only travel in debug mode.
        let sink = if manifest.debug {
            LogSink::new(tx.clone())
        } else {
            LogSink::discard()
        };
        let ctx = TaskContext::new(manifest.pool_id.clone(), worker_index, message.chunk_index, sink);
        let span = telemetry::chunk_span(&manifest.pool_id, worker_index, message.chunk_index);
        let result = execute_chunk(task.as_ref(), message, ctx)
            .instrument(span)
            .await;
        if tx.send(WorkerMessage::from_result(result)).is_err() {
            break;
        }
    }

    drop(tx);
    output.await.context("worker output task panicked")??;
    tracing::debug!(pool_id = %manifest.pool_id, worker_index, "worker input closed");
    Ok(())
}

async fn write_messages<W>(
    mut rx: mpsc::UnboundedReceiver<WorkerMessage>,
    mut writer: W,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(())
}
