//! Benchmarks for telemetry collections and the search index
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use mct_telemetry::search::SearchIndex;
use mct_telemetry::subscription::{
    DomainObject, LocalSource, SubscribeOptions, TelemetryMetadata, TelemetrySubscriptionManager,
};
use mct_telemetry::telemetry::{SortOrder, TelemetryCollection, TelemetryPoint, TelemetryQueue, TimeBounds};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn create_test_points(count: usize) -> Vec<TelemetryPoint> {
    (0..count)
        .map(|i| {
            TelemetryPoint::new()
                .with("utc", i as i64 * 1000)
                .with("value", (i as f64 * 0.1).sin())
        })
        .collect()
}

fn bench_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection");

    for size in [100, 1000, 10000] {
        let points = create_test_points(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("add_in_order_{}", size), |b| {
            b.iter_batched(
                || points.clone(),
                |batch| {
                    let mut collection = TelemetryCollection::new("utc");
                    collection.add(black_box(batch));
                    collection
                },
                BatchSize::SmallInput,
            )
        });

        let mut reversed = points.clone();
        reversed.reverse();
        group.bench_function(format!("add_reversed_{}", size), |b| {
            b.iter_batched(
                || reversed.clone(),
                |batch| {
                    let mut collection = TelemetryCollection::new("utc");
                    collection.add(black_box(batch));
                    collection
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("slide_window_{}", size), |b| {
            let end = size as f64 * 1000.0;
            b.iter_batched(
                || {
                    let mut collection = TelemetryCollection::new("utc");
                    collection.add(points.clone());
                    collection
                },
                |mut collection| {
                    let bounds = TimeBounds::new(end / 2.0, end).unwrap();
                    collection.bounds(black_box(bounds));
                    collection
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.bench_function("resort_10000", |b| {
        let points = create_test_points(10000);
        b.iter_batched(
            || {
                let mut collection = TelemetryCollection::new("utc");
                collection.add(points.clone());
                collection
            },
            |mut collection| {
                collection.sort("value", SortOrder::Descending);
                collection
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");

    group.bench_function("put_poll_1000", |b| {
        let points = create_test_points(1000);
        b.iter(|| {
            let mut queue = TelemetryQueue::new();
            for (i, point) in points.iter().enumerate() {
                queue.put(&format!("source-{}", i % 8), point.clone());
            }
            while let Some(frame) = queue.poll() {
                black_box(frame);
            }
        });
    });

    group.finish();
}

fn bench_subscription(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("subscription");

    group.bench_function("emit_1000_lossless", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let source = Arc::new(LocalSource::new("bench", TelemetryMetadata::default()));
                let manager = TelemetrySubscriptionManager::default();
                let received = Arc::new(AtomicUsize::new(0));
                let counter = Arc::clone(&received);

                let subscription = manager
                    .subscribe(
                        DomainObject::Direct(source.clone()),
                        move |frame| {
                            counter.fetch_add(frame.len(), Ordering::Relaxed);
                        },
                        SubscribeOptions::lossless(),
                    )
                    .await
                    .unwrap();

                while source.subscriber_count() == 0 {
                    tokio::task::yield_now().await;
                }

                let points = create_test_points(1000);
                let expected = iters as usize * points.len();
                let start = std::time::Instant::now();

                for _ in 0..iters {
                    for point in &points {
                        source.emit(point.clone());
                    }
                }
                while received.load(Ordering::Relaxed) < expected {
                    tokio::task::yield_now().await;
                }

                let elapsed = start.elapsed();
                subscription.unsubscribe().await;
                elapsed
            })
        });
    });

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");

    let mut index = SearchIndex::new();
    for i in 0..10000 {
        index.index(
            format!("obj-{}", i),
            json!({ "name": format!("Subsystem {} Sensor {}", i % 50, i) }),
        );
    }

    group.bench_function("query_10000", |b| {
        b.iter(|| index.search(black_box("subsystem 7 sensor"), 100, None))
    });

    group.finish();
}

criterion_group!(benches, bench_collection, bench_queue, bench_subscription, bench_search);
criterion_main!(benches);
