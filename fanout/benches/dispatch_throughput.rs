//! Benchmarks for partitioning and thread-pool dispatch using criterion.
//!
//! - Partitioning batches of various sizes across 4 and 16 workers
//! - End-to-end thread-pool dispatch of a summing task at several pool sizes

#![allow(missing_docs)]

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fanout::*;
use fanout_testkit::{int_batch, test_registry};

fn bench_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition");

    for len in [100usize, 10_000, 100_000] {
        for workers in [4usize, 16] {
            group.throughput(Throughput::Elements(len as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{workers}_workers"), len),
                &(len, workers),
                |b, &(len, workers)| {
                    b.iter_batched(
                        || (0..len).collect::<Vec<usize>>(),
                        |batch| black_box(partition(batch, workers)),
                        criterion::BatchSize::SmallInput,
                    )
                },
            );
        }
    }

    group.finish();
}

fn bench_thread_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
    let mut group = c.benchmark_group("thread_dispatch");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(10));

    const BATCH: i64 = 1_000;

    for workers in [1usize, 4, 8] {
        let orchestrator = rt
            .block_on(
                OrchestratorBuilder::new()
                    .registry(test_registry())
                    .pool(
                        "bench",
                        PoolConfig::thread().with_size(workers),
                        TaskReference::registered("sum"),
                    )
                    .build(),
            )
            .expect("Failed to build orchestrator");

        group.throughput(Throughput::Elements(BATCH as u64));
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            b.to_async(&rt).iter(|| async {
                let results = orchestrator
                    .run_batch(int_batch(BATCH), None)
                    .await
                    .expect("dispatch failed");
                black_box(results)
            })
        });

        rt.block_on(orchestrator.teardown(None));
    }

    group.finish();
}

criterion_group!(benches, bench_partition, bench_thread_dispatch);
criterion_main!(benches);
