//! Stress test - many timers
//!
//! Schedules a large number of one-shot timers spread over the reactor
//! threads, cancels every other one, and checks that exactly the
//! surviving half fires. A batch of recurring timers ticks alongside.
//!
//! Usage: `stress [num_timers] [num_recurring]`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ktimer::{Cookie, ReactorConfig, TimerFn, TimerHandle};
use tracing::warn;

fn main() {
    println!("=== ktimer Stress Test ===\n");

    let num_timers: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000);
    let num_recurring: usize = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(64);

    #[cfg(target_os = "linux")]
    run(num_timers, num_recurring);
    #[cfg(not(target_os = "linux"))]
    eprintln!(
        "ktimer needs timerfd and epoll (Linux only); {} timers not run",
        num_timers + num_recurring
    );

    println!("\n=== Stress Test Complete ===");
}

#[cfg(target_os = "linux")]
fn run(num_timers: usize, num_recurring: usize) {
    ktimer::logging::init();

    let config = ReactorConfig::from_env();
    let threads = config.num_threads;
    let service = match ktimer::LinuxTimerService::start(config) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("failed to start timer service: {}", e);
            std::process::exit(1);
        }
    };

    let fired = Arc::new(AtomicU64::new(0));
    let ticks = Arc::new(AtomicU64::new(0));

    let f = fired.clone();
    let oneshot: TimerFn = Arc::new(move |_| {
        f.fetch_add(1, Ordering::Relaxed);
    });
    let t = ticks.clone();
    let tick: TimerFn = Arc::new(move |_| {
        t.fetch_add(1, Ordering::Relaxed);
    });

    let mut recurring = Vec::with_capacity(num_recurring);
    for i in 0..num_recurring {
        let period = Duration::from_millis(5 + (i as u64 % 20));
        let thread = i % threads;
        match service.schedule_thread_timer(thread, period, true, Cookie::none(), tick.clone()) {
            Ok(handle) => recurring.push(handle),
            Err(e) => warn!(error = %e, "recurring timer not scheduled"),
        }
    }
    println!("Recurring timers: {}", recurring.len());

    println!("Scheduling {} one-shot timers on {} thread(s)...", num_timers, threads);
    let start = Instant::now();
    let mut handles: Vec<TimerHandle> = Vec::with_capacity(num_timers);
    let mut failed = 0u64;
    for i in 0..num_timers {
        // Up to one second out, not in deadline order
        let delay = Duration::from_micros(((i as u64) * 7919) % 1_000_000);
        let thread = i % threads;
        match service.schedule_thread_timer(thread, delay, false, Cookie::none(), oneshot.clone()) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                if failed == 0 {
                    warn!(error = %e, "one-shot timer not scheduled");
                }
                failed += 1;
            }
        }

        if (i + 1) % 10_000 == 0 {
            print!("\rScheduled: {}/{}", i + 1, num_timers);
        }
    }
    let schedule_time = start.elapsed();
    println!("\n\nSchedule time: {:?}", schedule_time);
    println!(
        "Schedule rate: {:.0} timers/sec",
        num_timers as f64 / schedule_time.as_secs_f64()
    );

    let cancel_start = Instant::now();
    let mut cancelled = 0u64;
    for handle in handles.iter().step_by(2) {
        if let Ok(true) = service.cancel_timer(handle) {
            cancelled += 1;
        }
    }
    println!("Cancelled:     {} in {:?}", cancelled, cancel_start.elapsed());

    // Everything still pending is due within a second
    let expected = handles.len() as u64 - cancelled;
    let wait_start = Instant::now();
    loop {
        let done = fired.load(Ordering::Relaxed);
        if done >= expected {
            break;
        }
        if wait_start.elapsed() > Duration::from_secs(10) {
            println!("Timeout! Only {}/{} fired", done, expected);
            break;
        }
        print!("\rFired: {}/{}", done, expected);
        std::thread::sleep(Duration::from_millis(100));
    }

    for handle in &recurring {
        let _ = service.cancel_timer(handle);
    }
    let total_time = start.elapsed();
    let stats = service.stats();

    println!("\n\n=== Results ===");
    println!("One-shots scheduled: {}", handles.len());
    println!("Schedule failures:   {}", failed);
    println!("Cancelled:           {}", cancelled);
    println!("Fired:               {}", fired.load(Ordering::Relaxed));
    println!("Expected:            {}", expected);
    println!("Recurring ticks:     {}", ticks.load(Ordering::Relaxed));
    println!("Total time:          {:?}", total_time);
    println!("Stats:               {:?}", stats);

    if let Err(e) = service.shutdown() {
        println!("Shutdown reported: {}", e);
    }
    service.reactor().shutdown();
}
