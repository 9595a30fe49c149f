use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fanout::*;
use parking_lot::Mutex;
use serde_json::{json, Value};

type Responder = dyn Fn(&[Value], Option<&Value>) -> ResultSet + Send + Sync;

/// In-memory [`WorkerPool`] that records what it was asked to do.
///
/// By default every dispatch answers with a single response
/// `{"pool": <id>, "items": <batch length>}`.
#[derive(Clone)]
pub struct MockPool {
    id: String,
    kind: PoolKind,
    worker_count: usize,
    delay: Option<Duration>,
    responder: Arc<Responder>,
    task: Arc<Mutex<Option<String>>>,
    closed: Arc<Mutex<bool>>,
    dispatches: Arc<Mutex<Vec<DispatchRecord>>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DispatchRecord {
    pub batch: Vec<Value>,
    pub params: Option<Value>,
}

impl MockPool {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let pool_id = id.clone();
        Self {
            id,
            kind: PoolKind::Thread,
            worker_count: 1,
            delay: None,
            responder: Arc::new(move |batch: &[Value], _: Option<&Value>| ResultSet {
                responses: vec![json!({ "pool": pool_id, "items": batch.len() })],
                failures: Vec::new(),
            }),
            task: Arc::new(Mutex::new(None)),
            closed: Arc::new(Mutex::new(false)),
            dispatches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sleep this long inside every dispatch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_kind(mut self, kind: PoolKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Answer every dispatch with a clone of `results`.
    pub fn with_results(mut self, results: ResultSet) -> Self {
        self.responder = Arc::new(move |_: &[Value], _: Option<&Value>| results.clone());
        self
    }

    /// Answer dispatches by calling `responder` with the batch and params.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&[Value], Option<&Value>) -> ResultSet + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }

    pub fn record(&self) -> Vec<DispatchRecord> {
        self.dispatches.lock().clone()
    }

    pub fn assert_dispatch_count_eq(&self, expected: usize) {
        let actual = self.dispatches.lock().len();
        assert_eq!(
            actual, expected,
            "Expected {} dispatches, got {}",
            expected, actual
        );
    }

    /// Label of the task the pool was configured with.
    pub fn configured_task(&self) -> Option<String> {
        self.task.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    pub fn boxed(self) -> Box<dyn WorkerPool> {
        Box::new(self)
    }
}

#[async_trait]
impl WorkerPool for MockPool {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> PoolKind {
        self.kind
    }

    fn worker_count(&self) -> usize {
        self.worker_count
    }

    async fn configure(&self, task: TaskReference) -> Result<(), PoolError> {
        let mut current = self.task.lock();
        if current.is_some() {
            return Err(PoolError::Configuration(format!(
                "pool '{}' is already configured",
                self.id
            )));
        }
        *current = Some(task.label().to_string());
        Ok(())
    }

    async fn dispatch(
        &self,
        batch: Vec<Value>,
        params: Option<Value>,
    ) -> Result<ResultSet, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed(self.id.clone()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let results = (self.responder)(&batch, params.as_ref());
        self.dispatches.lock().push(DispatchRecord { batch, params });
        Ok(results)
    }

    async fn teardown(&self) {
        *self.closed.lock() = true;
    }

    async fn live_workers(&self) -> usize {
        if self.is_closed() {
            0
        } else {
            self.worker_count
        }
    }
}
