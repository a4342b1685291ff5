//! # Command Queue Benchmark
//!
//! Measures:
//! 1. Raw enqueue + flush + playback on a private queue
//! 2. Accessor batches submitted through the core thread (one lock per batch)
//! 3. Blocking round trip latency (enqueue, wake, execute, notify)

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ember_core::{CommandQueue, CoreThread, CoreThreadConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn bench_queue_playback(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_playback");

    for batch_size in [64u64, 1024, 16_384] {
        let counter = Arc::new(AtomicU64::new(0));
        group.throughput(Throughput::Elements(batch_size));

        group.bench_with_input(
            BenchmarkId::new("enqueue_flush_playback", batch_size),
            &batch_size,
            |b, &n| {
                let mut queue = CommandQueue::with_capacity(n as usize);
                b.iter(|| {
                    for _ in 0..n {
                        let counter = Arc::clone(&counter);
                        queue.queue(
                            move || {
                                counter.fetch_add(1, Ordering::Relaxed);
                            },
                            None,
                        );
                    }
                    black_box(queue.flush().playback(|_| {}));
                });
            },
        );
    }

    group.finish();
}

fn bench_accessor_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("accessor_submit");
    let core = CoreThread::new(CoreThreadConfig::default()).expect("core thread");
    let accessor = core.get_accessor();

    for batch_size in [16u64, 256, 4096] {
        let counter = Arc::new(AtomicU64::new(0));
        group.throughput(Throughput::Elements(batch_size));

        group.bench_with_input(
            BenchmarkId::new("batch_blocking", batch_size),
            &batch_size,
            |b, &n| {
                b.iter(|| {
                    for _ in 0..n {
                        let counter = Arc::clone(&counter);
                        accessor.queue_command(
                            move || {
                                counter.fetch_add(1, Ordering::Relaxed);
                            },
                            false,
                        );
                    }
                    accessor.submit_to_core_thread(true).expect("submit");
                });
            },
        );
    }

    group.finish();
    core.shutdown().expect("shutdown");
}

fn bench_round_trip(c: &mut Criterion) {
    let core = CoreThread::new(CoreThreadConfig::default()).expect("core thread");

    c.bench_function("blocking_round_trip", |b| {
        b.iter(|| {
            let value = core
                .queue_return_command(|| black_box(7u32), true)
                .expect("queue");
            black_box(value.try_take().expect("result"));
        });
    });

    core.shutdown().expect("shutdown");
}

criterion_group!(benches, bench_queue_playback, bench_accessor_submit, bench_round_trip);
criterion_main!(benches);
