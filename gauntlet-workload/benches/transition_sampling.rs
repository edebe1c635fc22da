//! Transition sampling and executor overhead benchmarks.
//!
//! Measures next-state draws for tables of various fan-out, and the cost of a
//! whole run whose state functions do nothing.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gauntlet_core::StateId;
use tokio::runtime::Builder;

use gauntlet_workload::random::seeded_stream;
use gauntlet_workload::{Harness, MemoryDatabase, RunOptions, TransitionTable, WorkloadConfig};

/// A table where every state can move to every state, with uneven weights.
fn full_table(states: usize) -> TransitionTable {
    let names: Vec<String> = (0..states).map(|i| format!("s{i:03}")).collect();
    let mut transitions: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    for from in &names {
        let row = transitions.entry(from.clone()).or_default();
        for (weight, to) in names.iter().enumerate() {
            row.insert(to.clone(), (weight + 1) as f64);
        }
    }
    TransitionTable::build(&names, &transitions)
}

fn bench_sample(c: &mut Criterion) {
    let mut group = c.benchmark_group("transition_sample");
    group.throughput(Throughput::Elements(1));

    for states in [2, 8, 64, 256] {
        let table = full_table(states);
        let mut rng = seeded_stream(42, 1);
        group.bench_with_input(BenchmarkId::from_parameter(states), &table, |b, table| {
            let mut current = StateId::new(0);
            b.iter(|| {
                if let Some(next) = table.sample(black_box(current), &mut rng) {
                    current = next;
                }
            });
        });
    }

    group.finish();
}

fn noop_workload(threads: u32, iterations: u64) -> WorkloadConfig {
    let next = [("a", 1.0), ("b", 2.0), ("c", 3.0)];
    WorkloadConfig::builder("noop")
        .thread_count(threads)
        .iterations(iterations)
        .state("a", |_, _, _| Ok(()))
        .state("b", |_, _, _| Ok(()))
        .state("c", |_, _, _| Ok(()))
        .transitions("a", next)
        .transitions("b", next)
        .transitions("c", next)
        .build()
}

/// Whole runs: spawn, step, join and report.
fn bench_run(c: &mut Criterion) {
    let rt = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .build()
        .expect("failed to build runtime");

    let iterations = 1_000;
    let mut group = c.benchmark_group("harness_run");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for threads in [1, 4, 16] {
        let config = noop_workload(threads, iterations);
        group.throughput(Throughput::Elements(u64::from(threads) * iterations));
        group.bench_with_input(BenchmarkId::new("threads", threads), &config, |b, config| {
            let harness = Harness::new(RunOptions::new().seed(7));
            b.iter(|| {
                rt.block_on(async {
                    let report = harness
                        .run(config, Arc::new(MemoryDatabase::new()), "bench")
                        .await
                        .expect("run failed");
                    black_box(report.stats());
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sample, bench_run);
criterion_main!(benches);
