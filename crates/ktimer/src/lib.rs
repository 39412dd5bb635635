//! # ktimer - reactor timer subsystem
//!
//! Timers for event-loop based runtimes. One-shot timers of a scheduler
//! share a single OS timer descriptor that is always programmed for the
//! earliest pending deadline; every recurring timer gets a dedicated
//! periodic descriptor the kernel re-arms on its own. Descriptors are
//! polled by reactor threads, either one thread (thread scope) or a set
//! of threads (global scope).
//!
//! ## Quick Start
//!
//! ```ignore
//! use ktimer::{Cookie, LinuxTimerService, ReactorConfig};
//! use std::time::Duration;
//!
//! ktimer::logging::init();
//! let service = LinuxTimerService::start(ReactorConfig::from_env())?;
//!
//! let once = service.schedule_thread_timer(
//!     0,
//!     Duration::from_millis(10),
//!     false,
//!     Cookie::new("request-42"),
//!     std::sync::Arc::new(|cookie| println!("timeout for {:?}", cookie)),
//! )?;
//!
//! service.cancel_timer(&once)?;
//! service.shutdown()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TimerService                           │
//! │   schedule_thread_timer / schedule_global_timer / cancel    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//!     ReactorTimer (thread N)          ReactorTimer (global)
//!              │                               │
//!              ▼                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  TimerDriver (timerfd)          Reactor (epoll threads)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub use ktimer_core::*;

pub use ktimer_runtime::{config, logging, service, timer};
pub use ktimer_runtime::{ReactorConfig, ReactorTimer, TimerService, TimerStats};

#[cfg(target_os = "linux")]
pub use ktimer_runtime::{
    reactor, timerfd, EpollReactor, LinuxTimerService, TimerFdDescriptor, TimerFdDriver,
};
