use std::time::Duration;

use async_trait::async_trait;
use fanout::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Sums integer items.
pub struct SumTask;

#[async_trait]
impl BatchTask for SumTask {
    type Item = i64;
    type Params = ();
    type Output = i64;

    async fn process(&self, input: TaskInput<i64, ()>, _ctx: &TaskContext) -> anyhow::Result<i64> {
        Ok(input.items.iter().sum())
    }
}

/// Params naming the item value that triggers a failure or crash.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TriggerParams {
    pub value: Option<i64>,
}

/// Fails any chunk that contains `params.value`; otherwise returns the
/// chunk's item count.
pub struct FailOnTask;

#[async_trait]
impl BatchTask for FailOnTask {
    type Item = i64;
    type Params = TriggerParams;
    type Output = usize;

    async fn process(
        &self,
        input: TaskInput<i64, TriggerParams>,
        _ctx: &TaskContext,
    ) -> anyhow::Result<usize> {
        if let Some(value) = input.params.value {
            if input.items.contains(&value) {
                anyhow::bail!("item {value} rejected");
            }
        }
        Ok(input.items.len())
    }
}

/// Exits the whole process when a chunk contains `params.value`.
///
/// Only meaningful in a child worker; on a thread pool it takes the host
/// down with it.
pub struct CrashOnTask;

#[async_trait]
impl BatchTask for CrashOnTask {
    type Item = i64;
    type Params = TriggerParams;
    type Output = usize;

    async fn process(
        &self,
        input: TaskInput<i64, TriggerParams>,
        _ctx: &TaskContext,
    ) -> anyhow::Result<usize> {
        if let Some(value) = input.params.value {
            if input.items.contains(&value) {
                std::process::exit(CRASH_EXIT_CODE);
            }
        }
        Ok(input.items.len())
    }
}

/// Exit code used by [`CrashOnTask`].
pub const CRASH_EXIT_CODE: i32 = 17;

/// Logs every item at info level and returns the item count.
pub struct LoggingTask;

#[async_trait]
impl BatchTask for LoggingTask {
    type Item = Value;
    type Params = ();
    type Output = usize;

    async fn process(
        &self,
        input: TaskInput<Value, ()>,
        ctx: &TaskContext,
    ) -> anyhow::Result<usize> {
        for item in &input.items {
            ctx.log_with(LogLevel::Info, "processing item", json!({ "item": item }));
        }
        Ok(input.items.len())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SleepParams {
    pub millis: u64,
}

/// Sleeps for `params.millis` and then returns its items unchanged.
pub struct SleepTask;

#[async_trait]
impl BatchTask for SleepTask {
    type Item = Value;
    type Params = SleepParams;
    type Output = Vec<Value>;

    async fn process(
        &self,
        input: TaskInput<Value, SleepParams>,
        _ctx: &TaskContext,
    ) -> anyhow::Result<Vec<Value>> {
        tokio::time::sleep(Duration::from_millis(input.params.millis)).await;
        Ok(input.items)
    }
}

/// Reports which worker ran which items, plus the process id.
pub struct EchoTask;

#[async_trait]
impl BatchTask for EchoTask {
    type Item = Value;
    type Params = Option<Value>;
    type Output = Value;

    async fn process(
        &self,
        input: TaskInput<Value, Option<Value>>,
        ctx: &TaskContext,
    ) -> anyhow::Result<Value> {
        Ok(json!({
            "pool_id": ctx.pool_id,
            "worker_index": ctx.worker_index,
            "chunk_index": ctx.chunk_index,
            "pid": std::process::id(),
            "items": input.items,
            "params": input.params,
        }))
    }
}

/// Registry with every reference task under its short name:
/// `sum`, `fail_on`, `crash_on`, `log`, `sleep` and `echo`.
pub fn test_registry() -> TaskRegistry {
    TaskRegistry::new()
        .register("sum", SumTask)
        .register("fail_on", FailOnTask)
        .register("crash_on", CrashOnTask)
        .register("log", LoggingTask)
        .register("sleep", SleepTask)
        .register("echo", EchoTask)
}

/// `0..n` as JSON items.
pub fn int_batch(n: i64) -> Vec<Value> {
    (0..n).map(Value::from).collect()
}
