//! Offer throughput of the deduplicating queues.
//!
//! Measures admission of unique keys against rejection of duplicates at
//! several queue depths, and the round trip through the in-memory grid.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use login_cluster::MemoryGrid;
use login_queue::config::OrderingMode;
use login_queue::{DeduplicatingQueue, DistributedQueue, DistributedQueueConfig, Task, TaskQueue};

const OFFERS: u64 = 1_000;

fn bench_local_offer(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_offer");
    group.throughput(Throughput::Elements(OFFERS));

    for depth in [0usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("unique", depth), &depth, |b, &depth| {
            b.iter_with_setup(
                || {
                    let queue = DeduplicatingQueue::<u32>::new("bench", depth + OFFERS as usize);
                    for i in 0..depth {
                        let _ = queue.try_offer(Task::new("BENCH", 0).with_dedup_key(format!("pre-{}", i)));
                    }
                    queue
                },
                |queue| {
                    for i in 0..OFFERS {
                        let task = Task::new("BENCH", 0).with_dedup_key(format!("key-{}", i));
                        black_box(queue.try_offer(task).ok());
                    }
                },
            );
        });

        group.bench_with_input(BenchmarkId::new("duplicate", depth), &depth, |b, &depth| {
            let queue = DeduplicatingQueue::<u32>::new("bench", depth + 1);
            for i in 0..depth.max(1) {
                let _ = queue.try_offer(Task::new("BENCH", 0).with_dedup_key(format!("pre-{}", i)));
            }
            b.iter(|| {
                for _ in 0..OFFERS {
                    let task = Task::new("BENCH", 0).with_dedup_key("pre-0");
                    black_box(queue.try_offer(task).ok());
                }
            });
        });
    }
    group.finish();
}

fn bench_priority_offer_poll(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_offer_poll");
    group.throughput(Throughput::Elements(OFFERS));
    group.bench_function("offer_then_drain", |b| {
        b.iter(|| {
            let queue = DeduplicatingQueue::<u32>::new("bench", OFFERS as usize)
                .with_ordering(OrderingMode::Priority);
            for i in 0..OFFERS {
                let task = Task::new("BENCH", 0)
                    .with_dedup_key(format!("key-{}", i))
                    .with_priority((i % 7) as i32);
                let _ = queue.try_offer(task);
            }
            while let Some(task) = queue.try_poll() {
                black_box(task);
            }
        });
    });
    group.finish();
}

fn bench_distributed_offer(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    let mut group = c.benchmark_group("distributed_offer");
    group.throughput(Throughput::Elements(OFFERS));

    group.bench_function("unique_then_drain", |b| {
        b.to_async(&runtime).iter(|| async {
            let grid = MemoryGrid::new("bench");
            let node = grid.join();
            let queue = DistributedQueue::<u32>::new(
                &*node,
                DistributedQueueConfig {
                    capacity: OFFERS as usize,
                    ..Default::default()
                },
            );
            for i in 0..OFFERS {
                let task = Task::new("BENCH", 0).with_dedup_key(format!("key-{}", i));
                black_box(queue.offer(task).await.ok());
            }
            while let Ok(Some(task)) = queue.poll().await {
                black_box(task);
            }
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_local_offer,
    bench_priority_offer_poll,
    bench_distributed_offer
);
criterion_main!(benches);
