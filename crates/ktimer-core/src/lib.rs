//! # ktimer-core
//!
//! Core types and traits for the ktimer reactor timer subsystem.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! The reactor-backed engine, the timerfd driver and the epoll reactor
//! live in `ktimer-runtime`.
//!
//! ## Modules
//!
//! - `cookie` - Opaque callback context and callback type
//! - `entry` - Deadline entry for one-shot timers
//! - `queue` - Deadline queue ordered by expiry
//! - `handle` - Timer handle (queue position or recurring timer)
//! - `scope` - Thread-local vs global scheduling scope
//! - `clock` - Monotonic clock abstraction
//! - `traits` - Scheduler contract and reactor/descriptor boundary traits
//! - `error` - Error types
//! - `env` - Environment variable utilities

pub mod clock;
pub mod cookie;
pub mod entry;
pub mod env;
pub mod error;
pub mod handle;
pub mod queue;
pub mod scope;
pub mod traits;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use cookie::{Cookie, TimerFn};
pub use entry::{DeadlineEntry, SchedulerId};
pub use env::{env_get, env_get_millis, env_get_opt, env_get_str};
pub use error::{TimerError, TimerResult};
pub use handle::{RecurringKey, TimerHandle};
pub use queue::{DeadlineQueue, QueueKey, QueueStats};
pub use scope::{ReactorThreadId, ThreadSelector, TimerScope};
pub use traits::{
    DescriptorMode, NotifyFn, Reactor, Registration, TimerDescriptor, TimerDriver,
    TimerScheduler,
};

/// Constants shared by the engine and the drivers
pub mod constants {
    use std::time::Duration;

    /// Smallest delay handed to a descriptor.
    ///
    /// A zero one-shot expiration disarms a timerfd, so already-due
    /// deadlines are armed with this instead.
    pub const MIN_ARM_DELAY: Duration = Duration::from_nanos(1);

    /// Default number of reactor threads
    pub const DEFAULT_REACTOR_THREADS: usize = 2;

    /// Maximum reactor threads
    pub const MAX_REACTOR_THREADS: usize = 64;
}
