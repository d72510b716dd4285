/// EventBus performance benchmarks using Criterion
///
/// Run with: cargo bench --bench event_bus_benchmark
///
/// Benchmarks cover:
/// - Emit throughput for a single handler
/// - Emit throughput with the full forwarder-style handler set
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weknora_core::event::{Event, EventBus, EventData, EventKind};

fn make_event(id: u64) -> Event {
    Event::new(
        format!("evt_{id}"),
        "bench-session",
        EventData::AgentFinalAnswer { content: "chunk".to_string(), done: false },
    )
}

/// Benchmark: emit throughput with one registered handler
fn bench_single_handler(c: &mut Criterion) {
    let mut group = c.benchmark_group("eventbus_single_handler");

    for event_count in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*event_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(event_count),
            event_count,
            |b, &count| {
                b.iter(|| {
                    let rt = tokio::runtime::Runtime::new().unwrap();
                    rt.block_on(async {
                        let bus = EventBus::new();
                        let counter = Arc::new(AtomicUsize::new(0));
                        {
                            let counter = Arc::clone(&counter);
                            bus.on(EventKind::AgentFinalAnswer, move |_event| {
                                let counter = Arc::clone(&counter);
                                async move {
                                    counter.fetch_add(1, Ordering::Relaxed);
                                    Ok(())
                                }
                            })
                            .await;
                        }

                        for i in 0..count {
                            bus.emit(make_event(i as u64)).await;
                        }

                        assert_eq!(counter.load(Ordering::Relaxed), count);
                        black_box(bus);
                    })
                });
            },
        );
    }
    group.finish();
}

/// Benchmark: emit with several handlers per kind, the SSE-forwarder shape
fn bench_handler_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("eventbus_handler_fanout");

    for handler_count in [1usize, 4, 8].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(handler_count),
            handler_count,
            |b, &handlers| {
                b.iter(|| {
                    let rt = tokio::runtime::Runtime::new().unwrap();
                    rt.block_on(async {
                        let bus = EventBus::new();
                        let counter = Arc::new(AtomicUsize::new(0));
                        for _ in 0..handlers {
                            let counter = Arc::clone(&counter);
                            bus.on(EventKind::AgentFinalAnswer, move |_event| {
                                let counter = Arc::clone(&counter);
                                async move {
                                    counter.fetch_add(1, Ordering::Relaxed);
                                    Ok(())
                                }
                            })
                            .await;
                        }

                        for i in 0..1_000u64 {
                            bus.emit(make_event(i)).await;
                        }
                        black_box(counter.load(Ordering::Relaxed));
                    })
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_single_handler, bench_handler_fanout);
criterion_main!(benches);
