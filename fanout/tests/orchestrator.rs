//! Orchestrator integration tests.
//!
//! Uses `MockPool` from fanout-testkit to check routing, ordering and
//! lifecycle independently of any worker backend.

use std::time::{Duration, Instant};

use fanout::*;
use fanout_testkit::{int_batch, test_registry, MockPool};
use serde_json::json;

async fn two_mocks(a: MockPool, b: MockPool) -> Orchestrator {
    OrchestratorBuilder::new()
        .with_pool("a", a.boxed())
        .with_pool("b", b.boxed())
        .build()
        .await
        .expect("orchestrator should build")
}

#[tokio::test]
async fn test_named_results_follow_request_order() {
    // The first pool answers last; results must still line up with requests.
    let a = MockPool::new("a").with_delay(Duration::from_millis(150));
    let b = MockPool::new("b");
    let orchestrator = two_mocks(a.clone(), b.clone()).await;

    let results = orchestrator
        .run_named(vec![
            NamedRequest::new("a", int_batch(3)),
            NamedRequest::new("b", int_batch(5)).with_params(json!({"k": 1})),
        ])
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].responses, vec![json!({"pool": "a", "items": 3})]);
    assert_eq!(results[1].responses, vec![json!({"pool": "b", "items": 5})]);
    assert_eq!(b.record()[0].params, Some(json!({"k": 1})));
}

#[tokio::test]
async fn test_named_pools_dispatch_concurrently() {
    let a = MockPool::new("a").with_delay(Duration::from_millis(300));
    let b = MockPool::new("b").with_delay(Duration::from_millis(300));
    let orchestrator = two_mocks(a, b).await;

    let started = Instant::now();
    orchestrator
        .run(RunRequest::Named(vec![
            NamedRequest::new("a", int_batch(1)),
            NamedRequest::new("b", int_batch(1)),
        ]))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(550));
}

#[tokio::test]
async fn test_unknown_pool_fails_before_any_dispatch() {
    let a = MockPool::new("a");
    let b = MockPool::new("b");
    let orchestrator = two_mocks(a.clone(), b.clone()).await;

    let err = orchestrator
        .run_named(vec![
            NamedRequest::new("a", int_batch(2)),
            NamedRequest::new("missing", int_batch(2)),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, PoolError::UnknownPool(id) if id == "missing"));
    a.assert_dispatch_count_eq(0);
    b.assert_dispatch_count_eq(0);
}

#[tokio::test]
async fn test_single_request_needs_exactly_one_pool() {
    let orchestrator = two_mocks(MockPool::new("a"), MockPool::new("b")).await;
    let err = orchestrator
        .run(RunRequest::single(int_batch(1), None))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_single_pool_response_shape() {
    let mock = MockPool::new(DEFAULT_POOL_ID);
    let orchestrator = OrchestratorBuilder::new()
        .with_pool(DEFAULT_POOL_ID, mock.clone().boxed())
        .build()
        .await
        .unwrap();

    let response = orchestrator
        .run(RunRequest::single(int_batch(4), Some(json!(1))))
        .await
        .unwrap();
    let results = response.into_single().expect("single response");
    assert_eq!(results.responses, vec![json!({"pool": "default", "items": 4})]);
    assert_eq!(mock.record()[0].batch, int_batch(4));
}

#[tokio::test]
async fn test_failures_pass_through_untouched() {
    let failing = MockPool::new("a").with_results(ResultSet {
        responses: vec![json!(1)],
        failures: vec!["chunk 1 failed".into()],
    });
    let orchestrator = two_mocks(failing, MockPool::new("b")).await;

    let results = orchestrator
        .run_named(vec![NamedRequest::new("a", int_batch(2))])
        .await
        .unwrap();
    assert_eq!(results[0].failures, vec!["chunk 1 failed".to_string()]);
    assert!(!results[0].is_success());
}

#[tokio::test]
async fn test_teardown_subset_keeps_entries() {
    let a = MockPool::new("a");
    let b = MockPool::new("b");
    let orchestrator = two_mocks(a.clone(), b.clone()).await;

    orchestrator.teardown(Some(&["a", "not-a-pool"])).await;
    assert!(a.is_closed());
    assert!(!b.is_closed());
    assert_eq!(orchestrator.pool_ids(), vec!["a", "b"]);

    let err = orchestrator
        .run_named(vec![NamedRequest::new("a", int_batch(1))])
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Closed(_)));

    orchestrator
        .run_named(vec![NamedRequest::new("b", int_batch(1))])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_remove_pool_tears_down_and_unregisters() {
    let a = MockPool::new("a");
    let mut orchestrator = two_mocks(a.clone(), MockPool::new("b")).await;

    let removed = orchestrator.remove_pool("a").await.expect("pool a exists");
    assert_eq!(removed.id(), "a");
    assert!(a.is_closed());
    assert_eq!(orchestrator.pool_ids(), vec!["b"]);
    assert!(orchestrator.remove_pool("a").await.is_none());

    // With one pool left a single request becomes valid.
    orchestrator.run_batch(int_batch(1), None).await.unwrap();
}

#[tokio::test]
async fn test_mixed_mock_and_thread_pools() {
    let mock = MockPool::new("mock");
    let orchestrator = OrchestratorBuilder::new()
        .registry(test_registry())
        .pool(
            "sum",
            PoolConfig::thread().with_size(2),
            TaskReference::registered("sum"),
        )
        .with_pool("mock", mock.clone().boxed())
        .build()
        .await
        .unwrap();

    let results = orchestrator
        .run_named(vec![
            NamedRequest::new("mock", int_batch(6)),
            NamedRequest::new("sum", int_batch(6)),
        ])
        .await
        .unwrap();

    assert_eq!(results[0].responses, vec![json!({"pool": "mock", "items": 6})]);
    assert_eq!(results[1].responses, vec![json!(3), json!(12)]);

    let pool = orchestrator.pool("sum").unwrap();
    assert_eq!(pool.kind(), PoolKind::Thread);
    assert_eq!(pool.worker_count(), 2);
    orchestrator.teardown(None).await;
    assert!(mock.is_closed());
}

#[tokio::test]
async fn test_empty_batch_yields_empty_results() {
    let orchestrator = Orchestrator::single(
        PoolConfig::thread().with_size(4),
        TaskReference::from_fn(|_, _, _| Ok(json!(null))),
    )
    .await
    .unwrap();

    let results = orchestrator.run_batch(Vec::new(), None).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_unconfigured_injected_pool_reports_not_configured() {
    let orchestrator = OrchestratorBuilder::new()
        .with_pool(
            "raw",
            ThreadPool::new(
                "raw",
                PoolConfig::thread().with_size(1),
                std::sync::Arc::new(TaskRegistry::new()),
            )
            .map(|pool| Box::new(pool) as Box<dyn WorkerPool>)
            .unwrap(),
        )
        .build()
        .await
        .unwrap();

    let err = orchestrator.run_batch(int_batch(1), None).await.unwrap_err();
    assert!(matches!(err, PoolError::NotConfigured(_)));
}
