//! Scheduler contract and boundary traits
//!
//! These traits define the interface between the platform-agnostic core,
//! the timer engine and the platform-specific collaborators it drives
//! (OS timer descriptors and the reactor that polls them).

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::cookie::{Cookie, TimerFn};
use crate::error::TimerResult;
use crate::handle::TimerHandle;
use crate::scope::{ReactorThreadId, TimerScope};

/// OS descriptor number of a timer object
pub type RawDescriptor = i32;

/// Readiness callback handed to the reactor at registration
pub type NotifyFn = Arc<dyn Fn() + Send + Sync + 'static>;

// ============================================================================
// Scheduler contract
// ============================================================================

/// Timer scheduling domain
///
/// Lifecycle is `active -> stopped`, one way. A one-shot handle goes
/// `scheduled -> fired | cancelled`; a recurring handle stays `scheduled`
/// across firings until cancelled or the scheduler stops.
pub trait TimerScheduler: Send + Sync {
    /// Schedule `callback(cookie)` to run after `delay`
    ///
    /// With `recurring` set the callback runs every `delay` until the
    /// returned handle is cancelled.
    ///
    /// # Errors
    ///
    /// `Stopped` after [`stop`](Self::stop), `InvalidArgument` for a zero
    /// recurring period or an unrepresentable deadline, `Descriptor` /
    /// `Registration` when the OS primitive or the reactor refuses. A
    /// failed call leaves no timer and no descriptor behind.
    fn schedule(
        &self,
        delay: Duration,
        recurring: bool,
        cookie: Cookie,
        callback: TimerFn,
    ) -> TimerResult<TimerHandle>;

    /// Cancel a timer
    ///
    /// Returns `Ok(true)` if a live timer was removed and `Ok(false)` for a
    /// handle that already fired, was already cancelled, is null or belongs
    /// to another scheduler. Once this returns the callback will not start
    /// again. Called from outside a timer callback it also waits for a
    /// recurring callback already running on another thread; called from
    /// inside one it never waits.
    fn cancel(&self, handle: &TimerHandle) -> TimerResult<bool>;

    /// Stop the scheduler
    ///
    /// Cancels every recurring timer, discards pending one-shots without
    /// running them and releases all descriptors. Idempotent.
    ///
    /// No callback of this scheduler starts after it returns, including
    /// one-shots a reactor thread had already dequeued. Waiting for
    /// callbacks in flight follows the rule of [`cancel`](Self::cancel).
    fn stop(&self) -> TimerResult<()>;

    fn is_stopped(&self) -> bool;

    fn scope(&self) -> &TimerScope;

    /// Schedule a one-shot timer with a closure
    fn schedule_once<F>(&self, delay: Duration, cookie: Cookie, f: F) -> TimerResult<TimerHandle>
    where
        F: Fn(&Cookie) + Send + Sync + 'static,
        Self: Sized,
    {
        self.schedule(delay, false, cookie, Arc::new(f))
    }

    /// Schedule a recurring timer with a closure
    fn schedule_recurring<F>(
        &self,
        period: Duration,
        cookie: Cookie,
        f: F,
    ) -> TimerResult<TimerHandle>
    where
        F: Fn(&Cookie) + Send + Sync + 'static,
        Self: Sized,
    {
        self.schedule(period, true, cookie, Arc::new(f))
    }
}

// ============================================================================
// OS timer primitive
// ============================================================================

/// How a new descriptor should behave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorMode {
    /// Created disarmed; reprogrammed one-shot by the engine
    Shared,
    /// Armed on creation, re-arms itself every period
    Periodic(Duration),
}

/// A kernel timer object a reactor can poll for readiness
///
/// Closing the descriptor is `Drop`.
pub trait TimerDescriptor: Send + Sync + 'static {
    fn raw(&self) -> RawDescriptor;

    /// Program a single expiration `delay` from now, replacing any previous one
    fn arm(&self, delay: Duration) -> io::Result<()>;

    /// Cancel any pending expiration
    fn disarm(&self) -> io::Result<()>;

    /// Consume pending expirations
    ///
    /// Returns the number of expirations since the last read, 0 if none
    /// were pending (another thread already consumed them).
    fn read_and_ack(&self) -> io::Result<u64>;
}

/// Factory for timer descriptors
pub trait TimerDriver: Send + Sync + 'static {
    type Descriptor: TimerDescriptor;

    fn create(&self, mode: DescriptorMode) -> io::Result<Self::Descriptor>;

    /// Driver name for logging
    fn name(&self) -> &'static str {
        "unknown"
    }
}

// ============================================================================
// Reactor boundary
// ============================================================================

/// A descriptor's membership in one reactor thread's polling set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration {
    pub thread: ReactorThreadId,
    pub token: u64,
    pub raw: RawDescriptor,
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd {} on reactor thread {} (token {})", self.raw, self.thread, self.token)
    }
}

/// Event loop that polls descriptors and calls back on readiness
///
/// The reactor calls the registered [`NotifyFn`] on the owning thread
/// whenever the descriptor becomes readable.
pub trait Reactor: Send + Sync + 'static {
    /// Threads currently running a polling loop
    fn thread_ids(&self) -> Vec<ReactorThreadId>;

    /// Add `raw` to `thread`'s polling set for read readiness
    fn register_descriptor(
        &self,
        thread: ReactorThreadId,
        raw: RawDescriptor,
        notify: NotifyFn,
    ) -> io::Result<Registration>;

    /// Remove a registration; its `NotifyFn` is dropped
    fn unregister_descriptor(&self, registration: &Registration) -> io::Result<()>;
}
