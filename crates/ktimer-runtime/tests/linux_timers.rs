//! End-to-end timers over timerfd descriptors and the epoll reactor

#![cfg(target_os = "linux")]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ktimer_core::{Cookie, ThreadSelector, TimerFn, TimerHandle};
use ktimer_runtime::{logging, LinuxTimerService, ReactorConfig};

fn start(threads: usize) -> LinuxTimerService {
    logging::init_for_tests();
    LinuxTimerService::start(
        ReactorConfig::new()
            .num_threads(threads)
            .poll_timeout(Duration::from_millis(10))
            .thread_name("ktimer-it"),
    )
    .unwrap()
}

fn counter() -> (Arc<AtomicUsize>, TimerFn) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let cb: TimerFn = Arc::new(move |_: &Cookie| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    (count, cb)
}

#[test]
fn oneshots_fire_in_deadline_order() {
    let service = start(1);
    let (tx, rx) = mpsc::channel::<u32>();

    for delay in [50u32, 10, 30] {
        let tx = tx.clone();
        service
            .schedule_thread_timer(
                0,
                Duration::from_millis(u64::from(delay)),
                false,
                Cookie::new(delay),
                Arc::new(move |cookie: &Cookie| {
                    let _ = tx.send(*cookie.downcast_ref::<u32>().unwrap());
                }),
            )
            .unwrap();
    }

    let order: Vec<u32> = (0..3)
        .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
        .collect();
    assert_eq!(order, vec![10, 30, 50]);

    let timer = service.thread_timer(0).unwrap();
    assert_eq!(timer.next_deadline(), None);
    assert_eq!(timer.armed_deadline(), None);
    service.shutdown().unwrap();
}

#[test]
fn oneshot_respects_deadline() {
    let service = start(1);
    let (tx, rx) = mpsc::channel();
    let started = Instant::now();

    service
        .schedule_thread_timer(
            0,
            Duration::from_millis(25),
            false,
            Cookie::none(),
            Arc::new(move |_: &Cookie| {
                let _ = tx.send(Instant::now());
            }),
        )
        .unwrap();

    let fired_at = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(fired_at.duration_since(started) >= Duration::from_millis(25));
    service.shutdown().unwrap();
}

#[test]
fn callbacks_run_on_owning_reactor_thread() {
    let service = start(3);
    let (tx, rx) = mpsc::channel();

    service
        .schedule_thread_timer(
            2,
            Duration::from_millis(5),
            false,
            Cookie::none(),
            Arc::new(move |_: &Cookie| {
                let _ = tx.send(thread::current().name().map(String::from));
            }),
        )
        .unwrap();

    let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(name.as_deref(), Some("ktimer-it-2"));
    service.shutdown().unwrap();
}

#[test]
fn recurring_timer_fires_until_cancelled() {
    let service = start(1);
    let (count, cb) = counter();

    let handle = service
        .schedule_thread_timer(0, Duration::from_millis(5), true, Cookie::none(), cb)
        .unwrap();
    thread::sleep(Duration::from_millis(60));
    assert!(count.load(Ordering::SeqCst) >= 3);

    assert!(service.cancel_timer(&handle).unwrap());
    let after_cancel = count.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(40));
    assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    assert!(!service.cancel_timer(&handle).unwrap());

    service.shutdown().unwrap();
}

#[test]
fn global_recurring_fires_once_per_period() {
    let service = start(4);
    let (count, cb) = counter();
    let period = Duration::from_millis(10);

    let started = Instant::now();
    let handle = service
        .schedule_global_timer(period, true, Cookie::none(), ThreadSelector::All, cb)
        .unwrap();
    thread::sleep(Duration::from_millis(105));
    service.cancel_timer(&handle).unwrap();
    let elapsed = started.elapsed();

    let fired = count.load(Ordering::SeqCst);
    let max_ticks = (elapsed.as_millis() / period.as_millis()) as usize;
    assert!(fired >= 1);
    // Four threads poll the descriptor; each tick must run once
    assert!(fired <= max_ticks, "fired {} times in {} ticks", fired, max_ticks);

    service.shutdown().unwrap();
}

#[test]
fn cancel_before_expiry_prevents_callback() {
    let service = start(2);
    let (count, cb) = counter();

    let handle = service
        .schedule_global_timer(
            Duration::from_millis(40),
            false,
            Cookie::none(),
            ThreadSelector::All,
            cb,
        )
        .unwrap();
    thread::sleep(Duration::from_millis(10));
    assert!(service.cancel_timer(&handle).unwrap());

    thread::sleep(Duration::from_millis(60));
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(!service.cancel_timer(&TimerHandle::Null).unwrap());
    service.shutdown().unwrap();
}

#[test]
fn shutdown_unregisters_everything() {
    let service = start(2);
    let (count, cb) = counter();

    service
        .schedule_thread_timer(0, Duration::from_millis(500), false, Cookie::none(), cb.clone())
        .unwrap();
    service
        .schedule_thread_timer(1, Duration::from_millis(5), true, Cookie::none(), cb.clone())
        .unwrap();
    service
        .schedule_global_timer(
            Duration::from_millis(5),
            true,
            Cookie::none(),
            ThreadSelector::All,
            cb,
        )
        .unwrap();
    assert_eq!(service.reactor().registration_count(), 1 + 1 + 2);

    service.shutdown().unwrap();
    assert_eq!(service.reactor().registration_count(), 0);

    let settled = count.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(count.load(Ordering::SeqCst), settled);
    service.reactor().shutdown();
}

#[test]
fn global_selector_limits_threads() {
    let service = start(3);
    let (tx, rx) = mpsc::channel();

    let handle = service
        .schedule_global_timer(
            Duration::from_millis(5),
            true,
            Cookie::none(),
            ThreadSelector::Only(vec![1]),
            Arc::new(move |_: &Cookie| {
                let _ = tx.send(thread::current().name().map(String::from));
            }),
        )
        .unwrap();
    assert_eq!(service.reactor().registration_count(), 1);

    for _ in 0..3 {
        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some("ktimer-it-1"));
    }
    assert!(service.cancel_timer(&handle).unwrap());
    service.shutdown().unwrap();
    assert_eq!(service.reactor().registration_count(), 0);
}

#[test]
fn recurring_callbacks_cancelling_each_other_both_return() {
    let service = Arc::new(start(2));
    let barrier = Arc::new(Barrier::new(3));
    let handles: Arc<[Mutex<TimerHandle>; 2]> = Arc::new(Default::default());
    let (tx, rx) = mpsc::channel();

    for (mine, other) in [(0usize, 1usize), (1, 0)] {
        let svc = Arc::downgrade(&service);
        let (barrier, cb_handles, tx) = (barrier.clone(), handles.clone(), tx.clone());
        let first = AtomicBool::new(true);
        let handle = service
            .schedule_thread_timer(
                mine,
                Duration::from_millis(5),
                true,
                Cookie::none(),
                Arc::new(move |_: &Cookie| {
                    if !first.swap(false, Ordering::SeqCst) {
                        return;
                    }
                    // Both callbacks are running when the cancels are issued
                    barrier.wait();
                    let target = *cb_handles[other].lock().unwrap();
                    let cancelled = svc.upgrade().and_then(|s| s.cancel_timer(&target).ok());
                    let _ = tx.send((mine, cancelled));
                }),
            )
            .unwrap();
        *handles[mine].lock().unwrap() = handle;
    }
    barrier.wait();

    let mut results: Vec<_> = (0..2)
        .map(|_| rx.recv_timeout(Duration::from_secs(3)).unwrap())
        .collect();
    results.sort_unstable();
    assert_eq!(results, vec![(0, Some(true)), (1, Some(true))]);
    assert_eq!(service.stats().active_recurring, 0);
    service.shutdown().unwrap();
}

/// Per-timer bookkeeping shared with its callback
#[derive(Default)]
struct Slot {
    runs: AtomicUsize,
    cancelled: AtomicBool,
    after_cancel: AtomicUsize,
}

fn slot_callback() -> TimerFn {
    Arc::new(|cookie: &Cookie| {
        let slot = cookie.downcast_ref::<Arc<Slot>>().unwrap();
        if slot.cancelled.load(Ordering::SeqCst) {
            slot.after_cancel.fetch_add(1, Ordering::SeqCst);
        }
        slot.runs.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn cancel_races_with_firing_threads() {
    let service = start(4);
    let cb = slot_callback();
    let mut oneshots = Vec::new();
    let mut recurring = Vec::new();

    for round in 0..20u64 {
        let mut batch = Vec::new();
        for i in 0..50u64 {
            let slot = Arc::new(Slot::default());
            let delay = Duration::from_micros((i * 37 + round * 11) % 2_000);
            let thread = (i % 4) as usize;
            let handle = service
                .schedule_thread_timer(thread, delay, false, Cookie::new(slot.clone()), cb.clone())
                .unwrap();
            batch.push((handle, slot));
        }
        let slot = Arc::new(Slot::default());
        let handle = service
            .schedule_global_timer(
                Duration::from_micros(300),
                true,
                Cookie::new(slot.clone()),
                ThreadSelector::All,
                cb.clone(),
            )
            .unwrap();
        recurring.push((handle, slot));

        // Cancel every other one-shot while the reactor threads fire the rest
        for (handle, slot) in batch.iter().step_by(2) {
            if service.cancel_timer(handle).unwrap() {
                slot.cancelled.store(true, Ordering::SeqCst);
            }
        }
        thread::sleep(Duration::from_micros(500));
        let (handle, slot) = recurring.last().unwrap();
        if service.cancel_timer(handle).unwrap() {
            slot.cancelled.store(true, Ordering::SeqCst);
        }
        oneshots.extend(batch);
    }

    // Every one-shot not cancelled fires exactly once
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let pending = oneshots
            .iter()
            .filter(|(_, slot)| !slot.cancelled.load(Ordering::SeqCst))
            .filter(|(_, slot)| slot.runs.load(Ordering::SeqCst) == 0)
            .count();
        if pending == 0 || Instant::now() > deadline {
            assert_eq!(pending, 0, "one-shots never fired");
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }

    for (_, slot) in &oneshots {
        let runs = slot.runs.load(Ordering::SeqCst);
        if slot.cancelled.load(Ordering::SeqCst) {
            assert_eq!(runs, 0);
        } else {
            assert_eq!(runs, 1);
        }
    }
    for (_, slot) in &recurring {
        assert!(slot.cancelled.load(Ordering::SeqCst));
        assert_eq!(slot.after_cancel.load(Ordering::SeqCst), 0);
    }
    assert_eq!(service.stats().active_recurring, 0);
    service.shutdown().unwrap();
}
