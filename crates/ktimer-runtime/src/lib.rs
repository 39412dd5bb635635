//! # ktimer-runtime
//!
//! Reactor-backed timer engine for the ktimer subsystem.
//!
//! This crate provides:
//! - `timer` - the engine multiplexing one-shots onto a shared descriptor
//!   and giving each recurring timer its own periodic descriptor
//! - `service` - per-thread and global schedulers over one reactor
//! - `timerfd` / `reactor` - the Linux timerfd driver and epoll reactor
//! - `config` - reactor configuration with environment overrides
//! - `logging` - `tracing` subscriber setup

pub mod config;
pub mod logging;
pub mod service;
pub mod timer;

pub use config::ReactorConfig;
pub use service::TimerService;
pub use timer::{ReactorTimer, TimerStats};

// Platform backend
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod reactor;
        pub mod timerfd;

        pub use reactor::EpollReactor;
        pub use service::LinuxTimerService;
        pub use timerfd::{TimerFdDescriptor, TimerFdDriver};
    }
}
