//! Thread-pool integration tests.
//!
//! Drives real OS-thread workers through the orchestrator with the
//! reference tasks from fanout-testkit.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use fanout::*;
use fanout_testkit::{int_batch, test_registry};
use serde_json::{json, Value};

async fn orchestrator(task: &str, size: usize) -> Orchestrator {
    OrchestratorBuilder::new()
        .registry(test_registry())
        .pool(
            DEFAULT_POOL_ID,
            PoolConfig::thread().with_size(size),
            TaskReference::registered(task),
        )
        .build()
        .await
        .expect("orchestrator should build")
}

#[tokio::test]
async fn test_sum_across_four_workers() {
    let orchestrator = orchestrator("sum", 4).await;
    let results = orchestrator.run_batch(int_batch(100), None).await.unwrap();

    assert_eq!(results.responses.len(), 4);
    assert!(results.failures.is_empty());
    let total: i64 = results.responses.iter().filter_map(Value::as_i64).sum();
    assert_eq!(total, 4950);

    orchestrator.teardown(None).await;
}

#[tokio::test]
async fn test_uneven_batch_is_split_three_two_three_two() {
    let orchestrator = orchestrator("echo", 4).await;
    let results = orchestrator.run_batch(int_batch(10), None).await.unwrap();

    let sizes: Vec<usize> = results
        .responses
        .iter()
        .map(|r| r["items"].as_array().map(Vec::len).unwrap_or(0))
        .collect();
    assert_eq!(sizes, vec![3, 2, 3, 2]);

    let workers: Vec<u64> = results
        .responses
        .iter()
        .filter_map(|r| r["worker_index"].as_u64())
        .collect();
    assert_eq!(workers, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_every_item_reaches_exactly_one_worker() {
    let orchestrator = orchestrator("echo", 7).await;
    let results = orchestrator.run_batch(int_batch(53), None).await.unwrap();

    let mut seen = Vec::new();
    for response in &results.responses {
        for item in response["items"].as_array().unwrap() {
            seen.push(item.as_i64().unwrap());
        }
    }
    assert_eq!(seen, (0..53).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_one_failing_chunk_does_not_abort_the_batch() {
    let orchestrator = orchestrator("fail_on", 4).await;
    let results = orchestrator
        .run_batch(int_batch(8), Some(json!({"value": 5})))
        .await
        .unwrap();

    assert_eq!(results.responses, vec![json!(2), json!(2), json!(2)]);
    assert_eq!(results.failures, vec!["item 5 rejected".to_string()]);
}

#[tokio::test]
async fn test_params_reach_every_chunk() {
    let orchestrator = orchestrator("echo", 3).await;
    let params = json!({"mode": "fast"});
    let results = orchestrator
        .run_batch(int_batch(3), Some(params.clone()))
        .await
        .unwrap();
    assert!(results.responses.iter().all(|r| r["params"] == params));
}

#[tokio::test]
async fn test_chunks_run_in_parallel() {
    let orchestrator = orchestrator("sleep", 4).await;
    let started = Instant::now();
    let results = orchestrator
        .run_batch(int_batch(4), Some(json!({"millis": 300})))
        .await
        .unwrap();

    assert_eq!(results.responses.len(), 4);
    assert!(started.elapsed() < Duration::from_millis(1_000));
}

#[tokio::test]
async fn test_each_chunk_gets_its_own_thread() {
    let orchestrator = Orchestrator::single(
        PoolConfig::thread().with_size(3),
        TaskReference::from_fn(|_, _, _| {
            Ok(json!(std::thread::current().name().unwrap_or_default()))
        }),
    )
    .await
    .unwrap();

    let results = orchestrator.run_batch(int_batch(3), None).await.unwrap();
    let names: HashSet<&str> = results.responses.iter().filter_map(Value::as_str).collect();
    assert_eq!(
        names,
        HashSet::from(["default-t0", "default-t1", "default-t2"])
    );
}

#[tokio::test]
async fn test_logging_task_still_reports_result() {
    let orchestrator = OrchestratorBuilder::new()
        .registry(test_registry())
        .pool(
            "logs",
            PoolConfig::thread().with_size(2).with_debug(true),
            TaskReference::registered("log"),
        )
        .build()
        .await
        .unwrap();

    let results = orchestrator
        .run_batch(vec![json!("a"), json!("b"), json!("c")], None)
        .await
        .unwrap();
    assert_eq!(results.responses, vec![json!(2), json!(1)]);
}

#[tokio::test]
async fn test_teardown_rejects_further_dispatch() {
    let orchestrator = orchestrator("sum", 2).await;
    orchestrator.teardown(None).await;

    let err = orchestrator.run_batch(int_batch(4), None).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, PoolError::Closed(id) if id == DEFAULT_POOL_ID));
}
