//! Task abstraction for worker units.
//!
//! A worker unit runs exactly one task, fixed when its pool is configured.
//! Tasks are either registered by name in a [`TaskRegistry`] (resolvable in
//! any process that builds the same registry, which is how process workers
//! find them) or handed over in memory as an [`ErasedTask`] for thread
//! pools.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::{LogLevel, LogRecord, WorkerMessage};

/// Input handed to a task for one chunk.
#[derive(Clone, Debug)]
pub struct TaskInput<I, P> {
    pub items: Vec<I>,
    pub params: P,
}

/// A batch-processing function run by worker units.
///
/// Items and params are decoded from JSON before `process` is called and the
/// output is encoded back to JSON, so the same task can run in a child
/// process or on a thread.
#[async_trait]
pub trait BatchTask: Send + Sync + 'static {
    type Item: DeserializeOwned + Send + 'static;
    type Params: DeserializeOwned + Default + Send + 'static;
    type Output: Serialize + Send + 'static;

    async fn process(
        &self,
        input: TaskInput<Self::Item, Self::Params>,
        ctx: &TaskContext,
    ) -> anyhow::Result<Self::Output>;
}

/// JSON-level view of a task, used by pools and the worker runtime.
#[async_trait]
pub trait ErasedTask: Send + Sync {
    async fn call(
        &self,
        items: Vec<Value>,
        params: Option<Value>,
        ctx: &TaskContext,
    ) -> anyhow::Result<Value>;
}

#[async_trait]
impl<T: BatchTask> ErasedTask for T {
    async fn call(
        &self,
        items: Vec<Value>,
        params: Option<Value>,
        ctx: &TaskContext,
    ) -> anyhow::Result<Value> {
        let items = items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T::Item>, _>>()
            .map_err(|err| anyhow::anyhow!("invalid batch item: {err}"))?;
        let params = match params {
            None | Some(Value::Null) => T::Params::default(),
            Some(value) => serde_json::from_value(value)
                .map_err(|err| anyhow::anyhow!("invalid task params: {err}"))?,
        };
        let output = self.process(TaskInput { items, params }, ctx).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Adapter turning a synchronous closure into a task.
///
/// ```ignore
/// let double = FnTask::new(|items, _params, _ctx| {
///     Ok(Value::from(items.len() * 2))
/// });
/// ```
pub struct FnTask<F> {
    func: F,
}

impl<F> FnTask<F>
where
    F: Fn(Vec<Value>, Option<Value>, &TaskContext) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> BatchTask for FnTask<F>
where
    F: Fn(Vec<Value>, Option<Value>, &TaskContext) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    type Item = Value;
    type Params = Option<Value>;
    type Output = Value;

    async fn process(
        &self,
        input: TaskInput<Value, Option<Value>>,
        ctx: &TaskContext,
    ) -> anyhow::Result<Value> {
        (self.func)(input.items, input.params, ctx)
    }
}

/// Named task handlers available to a process.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn ErasedTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed task under `name`, replacing any previous entry.
    pub fn register<T: BatchTask>(mut self, name: impl Into<String>, task: T) -> Self {
        self.tasks.insert(name.into(), Arc::new(task));
        self
    }

    /// Register a closure under `name`, replacing any previous entry.
    pub fn register_fn<F>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Vec<Value>, Option<Value>, &TaskContext) -> anyhow::Result<Value>
            + Send
            + Sync
            + 'static,
    {
        self.register_erased(name, Arc::new(FnTask::new(func)))
    }

    /// Register an already type-erased task under `name`.
    pub fn register_erased(mut self, name: impl Into<String>, task: Arc<dyn ErasedTask>) -> Self {
        self.tasks.insert(name.into(), task);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ErasedTask>> {
        self.tasks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

/// The task a pool binds its workers to.
#[derive(Clone)]
pub enum TaskReference {
    /// A handler registered under this name. Process workers resolve it in
    /// the child's registry, thread workers in the host's.
    Registered { name: String },
    /// An in-memory task. Only thread pools can run these.
    Inline(Arc<dyn ErasedTask>),
}

impl TaskReference {
    pub fn registered(name: impl Into<String>) -> Self {
        TaskReference::Registered { name: name.into() }
    }

    pub fn inline<T: ErasedTask + 'static>(task: T) -> Self {
        TaskReference::Inline(Arc::new(task))
    }

    pub fn from_fn<F>(func: F) -> Self
    where
        F: Fn(Vec<Value>, Option<Value>, &TaskContext) -> anyhow::Result<Value>
            + Send
            + Sync
            + 'static,
    {
        TaskReference::Inline(Arc::new(FnTask::new(func)))
    }

    /// Name used in logs and artifacts.
    pub fn label(&self) -> &str {
        match self {
            TaskReference::Registered { name } => name,
            TaskReference::Inline(_) => "<inline>",
        }
    }
}

impl fmt::Debug for TaskReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskReference::Registered { name } => {
                f.debug_struct("Registered").field("name", name).finish()
            }
            TaskReference::Inline(_) => f.write_str("Inline(..)"),
        }
    }
}

/// Where a task's log records go.
///
/// Wraps the same channel the worker's terminal result travels on, so log
/// records always arrive before the result.
#[derive(Clone, Debug)]
pub struct LogSink {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl LogSink {
    pub fn new(tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self { tx }
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    pub fn send(&self, record: LogRecord) {
        // The host may have stopped listening; logs are best-effort.
        let _ = self.tx.send(WorkerMessage::Log(record));
    }
}

/// Per-chunk context handed to a running task.
#[derive(Clone, Debug)]
pub struct TaskContext {
    pub pool_id: String,
    pub worker_index: usize,
    pub chunk_index: usize,
    sink: LogSink,
}

impl TaskContext {
    pub fn new(
        pool_id: impl Into<String>,
        worker_index: usize,
        chunk_index: usize,
        sink: LogSink,
    ) -> Self {
        Self {
            pool_id: pool_id.into(),
            worker_index,
            chunk_index,
            sink,
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.log_with(level, message, Value::Null);
    }

    pub fn log_with(&self, level: LogLevel, message: impl Into<String>, params: Value) {
        self.sink.send(LogRecord {
            level,
            message: message.into(),
            params,
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    struct Sum;

    #[async_trait]
    impl BatchTask for Sum {
        type Item = i64;
        type Params = ();
        type Output = i64;

        async fn process(
            &self,
            input: TaskInput<i64, ()>,
            _ctx: &TaskContext,
        ) -> anyhow::Result<i64> {
            Ok(input.items.iter().sum())
        }
    }

    #[derive(Default, Deserialize)]
    struct Scale {
        factor: i64,
    }

    struct Scaled;

    #[async_trait]
    impl BatchTask for Scaled {
        type Item = i64;
        type Params = Scale;
        type Output = Vec<i64>;

        async fn process(
            &self,
            input: TaskInput<i64, Scale>,
            _ctx: &TaskContext,
        ) -> anyhow::Result<Vec<i64>> {
            Ok(input.items.iter().map(|i| i * input.params.factor).collect())
        }
    }

    fn ctx() -> TaskContext {
        TaskContext::new("test", 0, 0, LogSink::discard())
    }

    #[tokio::test]
    async fn test_typed_task_through_erased_interface() {
        let task: Arc<dyn ErasedTask> = Arc::new(Sum);
        let out = task
            .call(vec![json!(1), json!(2), json!(3)], None, &ctx())
            .await
            .unwrap();
        assert_eq!(out, json!(6));
    }

    #[tokio::test]
    async fn test_params_decoded_or_defaulted() {
        let task: Arc<dyn ErasedTask> = Arc::new(Scaled);
        let out = task
            .call(vec![json!(2)], Some(json!({"factor": 5})), &ctx())
            .await
            .unwrap();
        assert_eq!(out, json!([10]));

        let out = task.call(vec![json!(2)], None, &ctx()).await.unwrap();
        assert_eq!(out, json!([0]));
    }

    #[tokio::test]
    async fn test_bad_item_is_task_error() {
        let task: Arc<dyn ErasedTask> = Arc::new(Sum);
        let err = task
            .call(vec![json!("nope")], None, &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid batch item"));
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let registry = TaskRegistry::new()
            .register("sum", Sum)
            .register_fn("count", |items, _params, _ctx| Ok(json!(items.len())));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["count", "sum"]);
        assert!(registry.get("missing").is_none());

        let count = registry.get("count").unwrap();
        let out = count
            .call(vec![json!(1), json!(1)], None, &ctx())
            .await
            .unwrap();
        assert_eq!(out, json!(2));
    }

    #[test]
    fn test_context_logs_reach_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = TaskContext::new("pool", 1, 3, LogSink::new(tx));
        ctx.log_with(LogLevel::Warn, "careful", json!({"n": 1}));
        ctx.info("plain");

        match rx.try_recv().unwrap() {
            WorkerMessage::Log(record) => {
                assert_eq!(record.level, LogLevel::Warn);
                assert_eq!(record.params, json!({"n": 1}));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(rx.try_recv().unwrap(), WorkerMessage::Log(_)));
    }

    #[test]
    fn test_reference_labels() {
        assert_eq!(TaskReference::registered("sum").label(), "sum");
        assert_eq!(
            TaskReference::from_fn(|_, _, _| Ok(Value::Null)).label(),
            "<inline>"
        );
    }
}
