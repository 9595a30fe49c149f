//! Messages exchanged between a pool and its worker units, and the
//! aggregated result of a dispatch.
//!
//! Process workers carry these as newline-delimited JSON over the child's
//! stdin and stdout; thread workers pass the same values over in-process
//! channels.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Host → worker: one chunk to process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostMessage {
    pub chunk_index: usize,
    pub items: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Severity of a worker log record.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Out-of-band log record emitted by a task while it runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// Terminal status of one chunk.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Worker → host.
///
/// A worker sends any number of `Log` messages followed by exactly one
/// `Result` per chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkerMessage {
    Log(LogRecord),
    Result {
        status: OutcomeStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}

impl WorkerMessage {
    pub fn from_result(result: ChunkResult) -> Self {
        match result {
            ChunkResult::Success(payload) => WorkerMessage::Result {
                status: OutcomeStatus::Success,
                payload: Some(payload),
                error_message: None,
            },
            ChunkResult::Failure(message) => WorkerMessage::Result {
                status: OutcomeStatus::Failure,
                payload: None,
                error_message: Some(message),
            },
        }
    }

    /// The chunk result carried by a `Result` message.
    pub fn into_result(self) -> Option<ChunkResult> {
        match self {
            WorkerMessage::Log(_) => None,
            WorkerMessage::Result {
                status: OutcomeStatus::Success,
                payload,
                ..
            } => Some(ChunkResult::Success(payload.unwrap_or(Value::Null))),
            WorkerMessage::Result {
                status: OutcomeStatus::Failure,
                error_message,
                ..
            } => Some(ChunkResult::Failure(
                error_message.unwrap_or_else(|| "task failed without an error message".to_string()),
            )),
        }
    }
}

/// What a worker unit produced for its chunk.
#[derive(Clone, Debug, PartialEq)]
pub enum ChunkResult {
    Success(Value),
    Failure(String),
}

impl ChunkResult {
    pub fn status(&self) -> OutcomeStatus {
        match self {
            ChunkResult::Success(_) => OutcomeStatus::Success,
            ChunkResult::Failure(_) => OutcomeStatus::Failure,
        }
    }
}

/// Terminal event for one chunk, attributed to the worker that ran it.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub worker_index: usize,
    pub result: ChunkResult,
}

/// Aggregated results of one dispatch.
///
/// Both vectors are ordered by chunk index; every dispatched chunk
/// contributes exactly one entry to one of them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub responses: Vec<Value>,
    pub failures: Vec<String>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: Outcome) {
        match outcome.result {
            ChunkResult::Success(payload) => self.responses.push(payload),
            ChunkResult::Failure(message) => self.failures.push(message),
        }
    }

    /// Number of chunks accounted for.
    pub fn len(&self) -> usize {
        self.responses.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty() && self.failures.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl FromIterator<Outcome> for ResultSet {
    fn from_iter<I: IntoIterator<Item = Outcome>>(iter: I) -> Self {
        let mut set = ResultSet::new();
        for outcome in iter {
            set.push(outcome);
        }
        set
    }
}
