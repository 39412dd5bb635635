//! Monotonic clock abstraction
//!
//! The engine reads time through [`Clock`] so tests can drive it with a
//! [`ManualClock`] instead of waiting on the real monotonic clock.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of monotonic instants
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The process monotonic clock (`CLOCK_MONOTONIC` on Linux)
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
///
/// Clones share the same time.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Start at the current monotonic instant
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move forward by `by`
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Move to `instant`; earlier instants are ignored so time never goes back
    pub fn set(&self, instant: Instant) {
        let mut now = self.now.lock();
        if instant > *now {
            *now = instant;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &*self.now.lock())
            .finish()
    }
}
