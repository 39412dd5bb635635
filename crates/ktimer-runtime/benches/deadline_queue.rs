//! Deadline queue and engine schedule/cancel benchmarks
//!
//! Run with: `cargo bench --bench deadline_queue -p ktimer-runtime`

use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ktimer_core::{Cookie, DeadlineEntry, DeadlineQueue, SchedulerId, TimerFn};

fn entry(now: Instant, offset_us: u64, owner: SchedulerId, cb: &TimerFn) -> DeadlineEntry {
    DeadlineEntry::new(
        now + Duration::from_micros(offset_us),
        Cookie::none(),
        cb.clone(),
        owner,
    )
}

/// Spread of offsets that does not arrive in order
fn offset(i: u64) -> u64 {
    (i * 7919) % 1_000_003
}

// ============================================================================
// DeadlineQueue
// ============================================================================

fn bench_insert_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("deadline_queue_insert_remove");
    let cb: TimerFn = Arc::new(|_| {});
    let owner = SchedulerId::next();

    for size in [100u64, 10_000, 100_000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let now = Instant::now();
            let mut queue = DeadlineQueue::new();
            for i in 0..size {
                queue.insert(entry(now, offset(i), owner, &cb));
            }
            let mut i = size;
            b.iter(|| {
                let key = queue.insert(entry(now, offset(i), owner, &cb));
                black_box(queue.remove(&key));
                i += 1;
            });
        });
    }

    group.finish();
}

fn bench_pop_all_due(c: &mut Criterion) {
    let mut group = c.benchmark_group("deadline_queue_pop_all_due");
    let cb: TimerFn = Arc::new(|_| {});
    let owner = SchedulerId::next();

    for batch in [1u64, 16, 256] {
        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let now = Instant::now();
            b.iter_batched(
                || {
                    let mut queue = DeadlineQueue::new();
                    for i in 0..10_000 {
                        queue.insert(entry(now, 1_000 + i, owner, &cb));
                    }
                    for i in 0..batch {
                        queue.insert(entry(now, i % 10, owner, &cb));
                    }
                    queue
                },
                |mut queue| black_box(queue.pop_all_due(now + Duration::from_micros(10))),
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

// ============================================================================
// Engine over timerfd (rearm syscall on every new minimum)
// ============================================================================

#[cfg(target_os = "linux")]
fn bench_engine_schedule_cancel(c: &mut Criterion) {
    use ktimer_core::{TimerScheduler, TimerScope};
    use ktimer_runtime::{EpollReactor, ReactorConfig, ReactorTimer, TimerFdDriver};

    let reactor = match EpollReactor::start(ReactorConfig::new().num_threads(1)) {
        Ok(reactor) => Arc::new(reactor),
        Err(_) => return,
    };
    let timer = ReactorTimer::new(TimerScope::Thread(0), Arc::new(TimerFdDriver::new()), reactor);
    let cb: TimerFn = Arc::new(|_| {});

    let mut group = c.benchmark_group("engine_schedule_cancel");
    group.throughput(Throughput::Elements(1));

    // Far deadline never becomes the minimum: no rearm
    timer
        .schedule(Duration::from_secs(1), false, Cookie::none(), cb.clone())
        .ok();
    group.bench_function("behind_minimum", |b| {
        b.iter(|| {
            let handle = timer.schedule(Duration::from_secs(60), false, Cookie::none(), cb.clone());
            if let Ok(h) = handle {
                black_box(timer.cancel(&h).ok());
            }
        });
    });

    // Each schedule and cancel moves the minimum: two rearms
    let soon = Duration::from_millis(1);
    group.bench_function("new_minimum", |b| {
        b.iter(|| {
            let handle = timer.schedule(soon, false, Cookie::none(), cb.clone());
            if let Ok(h) = handle {
                black_box(timer.cancel(&h).ok());
            }
        });
    });

    group.finish();
}

#[cfg(not(target_os = "linux"))]
fn bench_engine_schedule_cancel(_c: &mut Criterion) {}

criterion_group!(
    benches,
    bench_insert_remove,
    bench_pop_all_due,
    bench_engine_schedule_cancel
);
criterion_main!(benches);
