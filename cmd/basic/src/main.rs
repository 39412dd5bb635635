//! Basic ktimer example
//!
//! Schedules one-shot timers on a reactor thread, a recurring global
//! timer, and cancels one of each before shutting down.
//!
//! # Environment Variables
//!
//! - `KTIMER_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `KTIMER_REACTOR_THREADS=4` - Number of reactor threads

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ktimer::{Cookie, ReactorConfig, ThreadSelector, TimerFn, TimerHandle, TimerResult};
use tracing::{debug, info};

// KTIMER_LOG_LEVEL=debug cargo run -p ktimer-basic
fn main() {
    println!("=== ktimer Basic Example ===\n");

    #[cfg(target_os = "linux")]
    run();
    #[cfg(not(target_os = "linux"))]
    eprintln!("ktimer needs timerfd and epoll (Linux only)");

    println!("\n=== Example Complete ===");
}

#[cfg(target_os = "linux")]
fn run() {
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
    println!("Reactor running with {} thread(s)", threads);

    let start = Instant::now();
    let fired = Arc::new(AtomicUsize::new(0));

    let f = fired.clone();
    let report: TimerFn = Arc::new(move |cookie| {
        let label = cookie.downcast_ref::<&'static str>().copied().unwrap_or("?");
        info!(label, elapsed = ?start.elapsed(), "one-shot fired");
        f.fetch_add(1, Ordering::SeqCst);
    });

    // Three one-shots on thread 0, scheduled out of order
    for (label, ms) in [("slow", 300u64), ("fast", 100), ("medium", 200)] {
        let delay = Duration::from_millis(ms);
        let handle =
            service.schedule_thread_timer(0, delay, false, Cookie::new(label), report.clone());
        let handle = scheduled(label, handle);
        println!("Scheduled {:<6} in {:>3}ms -> {}", label, ms, handle);
    }

    // One more that gets cancelled before it fires
    let doomed = service.schedule_thread_timer(
        0,
        Duration::from_millis(150),
        false,
        Cookie::new("doomed"),
        report,
    );
    let doomed = scheduled("doomed", doomed);

    // Recurring heartbeat on whichever reactor thread reads it first
    let beats = Arc::new(AtomicUsize::new(0));
    let b = beats.clone();
    let heartbeat = service.schedule_global_timer(
        Duration::from_millis(50),
        true,
        Cookie::none(),
        ThreadSelector::All,
        Arc::new(move |_| {
            let n = b.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(beat = n, "heartbeat");
        }),
    );
    let heartbeat = scheduled("heartbeat", heartbeat);

    std::thread::sleep(Duration::from_millis(50));
    match service.cancel_timer(&doomed) {
        Ok(cancelled) => println!("Cancelled doomed timer: {}", cancelled),
        Err(e) => println!("Cancel failed: {}", e),
    }

    std::thread::sleep(Duration::from_millis(350));
    let _ = service.cancel_timer(&heartbeat);

    let stats = service.stats();
    println!("\nOne-shots fired: {}", fired.load(Ordering::SeqCst));
    println!("Heartbeats:      {}", beats.load(Ordering::SeqCst));
    println!("Stats:           {:?}", stats);

    if let Err(e) = service.shutdown() {
        println!("Shutdown reported: {}", e);
    }
    service.reactor().shutdown();
}

#[cfg(target_os = "linux")]
fn scheduled(label: &str, result: TimerResult<TimerHandle>) -> TimerHandle {
    match result {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("failed to schedule {}: {}", label, e);
            std::process::exit(1);
        }
    }
}
