//! Deadline entry and scheduler identity

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::cookie::{Cookie, TimerFn};

/// Process-unique identity of a scheduler instance
///
/// Handles carry the id of the scheduler that issued them so a handle
/// passed to the wrong scheduler is ignored rather than misapplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchedulerId(u64);

impl SchedulerId {
    /// Allocate a fresh id
    #[inline]
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        SchedulerId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value (for logging)
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sched-{}", self.0)
    }
}

/// One pending one-shot firing
///
/// Immutable once created; owned by the deadline queue until it is
/// popped for firing or removed by `cancel`.
#[derive(Clone)]
pub struct DeadlineEntry {
    expiry: Instant,
    callback: TimerFn,
    cookie: Cookie,
    owner: SchedulerId,
}

impl DeadlineEntry {
    pub fn new(expiry: Instant, cookie: Cookie, callback: TimerFn, owner: SchedulerId) -> Self {
        Self {
            expiry,
            callback,
            cookie,
            owner,
        }
    }

    /// Entry expiring `delay` after `now`
    ///
    /// Returns None if the deadline is not representable.
    pub fn after(
        now: Instant,
        delay: Duration,
        cookie: Cookie,
        callback: TimerFn,
        owner: SchedulerId,
    ) -> Option<Self> {
        now.checked_add(delay)
            .map(|expiry| Self::new(expiry, cookie, callback, owner))
    }

    #[inline]
    pub fn expiry(&self) -> Instant {
        self.expiry
    }

    #[inline]
    pub fn cookie(&self) -> &Cookie {
        &self.cookie
    }

    #[inline]
    pub fn owner(&self) -> SchedulerId {
        self.owner
    }

    /// Invoke the callback with this entry's cookie
    #[inline]
    pub fn fire(&self) {
        (self.callback)(&self.cookie)
    }
}

impl fmt::Debug for DeadlineEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineEntry")
            .field("expiry", &self.expiry)
            .field("cookie", &self.cookie)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}
