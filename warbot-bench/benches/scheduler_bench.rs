//! Scheduler benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use tokio::time::Instant;
use warbot_agent::{Scheduler, Timings};

fn filled(count: u64) -> (Scheduler<u64>, Instant) {
    let t0 = Instant::now();
    let mut scheduler = Scheduler::new(Timings::default());
    for i in 0..count {
        let at = t0 + Duration::from_millis((i * 7919) % 10_000);
        scheduler.add_task(at, Box::new(move |sum: &mut u64| *sum += i));
        if i % 10 == 0 {
            scheduler.add_keyed((i % 64) as i32, at, Box::new(|sum: &mut u64| *sum += 1));
        }
    }
    (scheduler, t0)
}

fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_drain");

    for count in [100u64, 1000, 10000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_with_setup(
                || filled(count),
                |(mut scheduler, t0)| {
                    let mut sum = 0u64;
                    let mut now = t0;
                    while let Some(at) = scheduler.next_wake(now) {
                        now = now.max(at);
                        for task in scheduler.take_due(now) {
                            task(&mut sum);
                        }
                    }
                    black_box(sum)
                },
            );
        });
    }

    group.finish();
}

fn bench_next_wake(c: &mut Criterion) {
    let (scheduler, t0) = filled(1000);
    c.bench_function("scheduler_next_wake", |b| {
        b.iter(|| black_box(scheduler.next_wake(black_box(t0))));
    });
}

criterion_group!(benches, bench_drain, bench_next_wake);
criterion_main!(benches);
