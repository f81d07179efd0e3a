//! Transaction Performance Benchmarks
//!
//! Measures commit throughput of the run loop:
//! - Single-threaded read-only, blind-write and read-modify-write bodies
//! - Multi-threaded blind increments (commutative, no conflicts)
//! - Multi-threaded read-modify-write on one counter (conflicting)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::thread;
use stoa_engine::{Stm, StmConfig};
use stoa_primitives::{TBox, TCounter};

fn bench_stm() -> Stm {
    Stm::open(StmConfig {
        max_threads: 16,
        ..StmConfig::default()
    })
    .unwrap()
}

/// Benchmark: Single-threaded transactions (no contention)
fn bench_single_threaded_transactions(c: &mut Criterion) {
    let stm = bench_stm();
    let worker = stm.worker().unwrap();
    let counter = TCounter::new(0);
    let cell = TBox::new(0u64);

    let mut group = c.benchmark_group("single_threaded");
    group.throughput(Throughput::Elements(1));

    group.bench_function("read_only", |b| {
        b.iter(|| {
            let outcome = worker.run(|txn| cell.read(txn)).unwrap();
            black_box(outcome.value);
        });
    });

    group.bench_function("tbox_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            worker.run(|txn| cell.write(txn, i)).unwrap();
            i += 1;
        });
    });

    group.bench_function("counter_get_set", |b| {
        b.iter(|| {
            let outcome = worker
                .run(|txn| {
                    let v = counter.get(txn)?;
                    counter.set(txn, v + 1)
                })
                .unwrap();
            black_box(outcome.attempts);
        });
    });

    group.finish();
}

/// Benchmark: Multi-threaded blind increments (commutative, no validation)
fn bench_multi_threaded_no_conflict(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_threaded_no_conflict");
    const PER_THREAD: u64 = 1_000;

    for num_threads in [2u64, 4, 8] {
        group.throughput(Throughput::Elements(num_threads * PER_THREAD));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_threads),
            &num_threads,
            |b, &num_threads| {
                let stm = bench_stm();
                let counter = TCounter::new(0);
                b.iter(|| {
                    thread::scope(|s| {
                        for _ in 0..num_threads {
                            s.spawn(|| {
                                let worker = stm.worker().unwrap();
                                for _ in 0..PER_THREAD {
                                    worker.run(|txn| counter.add(txn, 1)).unwrap();
                                }
                            });
                        }
                    });
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: Multi-threaded read-modify-write on one counter
fn bench_multi_threaded_with_conflict(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_threaded_with_conflict");
    const PER_THREAD: u64 = 1_000;

    for num_threads in [2u64, 4] {
        group.throughput(Throughput::Elements(num_threads * PER_THREAD));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_threads),
            &num_threads,
            |b, &num_threads| {
                let stm = bench_stm();
                let counter = TCounter::new(0);
                b.iter(|| {
                    thread::scope(|s| {
                        for _ in 0..num_threads {
                            s.spawn(|| {
                                let worker = stm.worker().unwrap();
                                for _ in 0..PER_THREAD {
                                    worker
                                        .run(|txn| {
                                            let v = counter.get(txn)?;
                                            counter.set(txn, v + 1)
                                        })
                                        .unwrap();
                                }
                            });
                        }
                    });
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_single_threaded_transactions,
    bench_multi_threaded_no_conflict,
    bench_multi_threaded_with_conflict,
);
criterion_main!(benches);
