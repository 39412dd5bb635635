//! Reactor-backed timer engine
//!
//! One-shot timers are multiplexed onto a single shared descriptor per
//! scheduler, reprogrammed to the deadline queue's minimum after every
//! mutation, so the number of open descriptors does not grow with the
//! number of pending one-shots.
//!
//! Recurring timers each get a dedicated periodic descriptor registered on
//! every reactor thread in scope. The kernel re-arms it, so firing needs
//! no queue work.
//!
//! # Locking
//!
//! - `Shared::state` guards the queue, the shared descriptor and the
//!   recurring set. Callbacks never run under it.
//! - A `FireGate` per recurring timer, and one for the dequeued
//!   one-shots, holds a live flag and the number of callbacks in flight.
//!   It is only held for the check, so callbacks may cancel any timer,
//!   their own included, without waiting on each other.
//! - Once `cancel` or `stop` returns, no callback of the affected timers
//!   starts. Called from outside a timer callback they also wait for
//!   callbacks already running on other threads.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use ktimer_core::constants::MIN_ARM_DELAY;
use ktimer_core::traits::RawDescriptor;
use ktimer_core::{
    Clock, Cookie, DeadlineEntry, DeadlineQueue, DescriptorMode, MonotonicClock, NotifyFn,
    Reactor, RecurringKey, Registration, SchedulerId, TimerDescriptor, TimerDriver, TimerError,
    TimerFn, TimerHandle, TimerResult, TimerScheduler, TimerScope,
};

/// Statistics snapshot of a [`ReactorTimer`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    /// One-shot timers waiting in the deadline queue
    pub pending_oneshots: usize,
    /// Recurring timers currently registered
    pub active_recurring: usize,
    /// Timers scheduled over the scheduler's lifetime (both classes)
    pub total_scheduled: u64,
    /// Callback invocations (one-shot firings plus recurring ticks)
    pub total_fired: u64,
    /// Timers removed by `cancel`
    pub total_cancelled: u64,
    /// One-shots dropped unfired by `stop`
    pub total_discarded: u64,
}

/// The shared descriptor backing every one-shot timer of a scheduler
struct CommonTimer<T> {
    descriptor: Arc<T>,
    registrations: Vec<Registration>,
    /// Deadline the descriptor is currently programmed for
    armed: Option<Instant>,
}

/// A recurring timer and its dedicated descriptor
struct RecurringTimer<T> {
    key: RecurringKey,
    period: Duration,
    cookie: Cookie,
    callback: TimerFn,
    descriptor: Arc<T>,
    registrations: Mutex<Vec<Registration>>,
    gate: FireGate,
}

impl<T: TimerDescriptor> RecurringTimer<T> {
    fn new(
        key: RecurringKey,
        period: Duration,
        cookie: Cookie,
        callback: TimerFn,
        descriptor: T,
        threads: usize,
    ) -> Self {
        Self {
            key,
            period,
            cookie,
            callback,
            descriptor: Arc::new(descriptor),
            registrations: Mutex::new(Vec::with_capacity(threads)),
            gate: FireGate::new(),
        }
    }

    /// Run the callback unless the timer has been cancelled
    ///
    /// Returns true if the callback ran.
    fn fire(&self) -> bool {
        let Some(_running) = self.gate.enter() else {
            return false;
        };
        (self.callback)(&self.cookie);
        true
    }

    /// Unregister from every reactor thread, collecting failures
    fn unregister_all<R: Reactor>(&self, reactor: &R, errors: &mut Vec<TimerError>) {
        let registrations = std::mem::take(&mut *self.registrations.lock());
        unregister_all(reactor, &registrations, errors);
    }
}

/// Live flag plus the count of callbacks admitted through it
///
/// The lock is only held to check and count, never across a callback.
struct FireGate {
    state: Mutex<GateState>,
    idle: Condvar,
}

struct GateState {
    live: bool,
    running: usize,
}

impl FireGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                live: true,
                running: 0,
            }),
            idle: Condvar::new(),
        }
    }

    /// Admit one callback, or None once closed
    fn enter(&self) -> Option<Running<'_>> {
        let mut state = self.state.lock();
        if !state.live {
            return None;
        }
        state.running += 1;
        Some(Running {
            gate: self,
            _scope: CallbackScope::enter(),
        })
    }

    /// Close so no further callback is admitted
    ///
    /// Outside timer callbacks this also waits for admitted callbacks
    /// still running on other threads. Inside one it returns at once: the
    /// running callback may be waiting on this thread in turn.
    fn close(&self) {
        let mut state = self.state.lock();
        state.live = false;
        if CallbackScope::active() {
            return;
        }
        while state.running > 0 {
            self.idle.wait(&mut state);
        }
    }
}

/// An admitted callback; leaves the gate when dropped, unwinding included
struct Running<'a> {
    gate: &'a FireGate,
    _scope: CallbackScope,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.running -= 1;
        if state.running == 0 {
            self.gate.idle.notify_all();
        }
    }
}

thread_local! {
    /// Depth of timer callbacks running on this thread
    static CALLBACK_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Marks the current thread as running a timer callback
struct CallbackScope;

impl CallbackScope {
    fn enter() -> Self {
        CALLBACK_DEPTH.with(|depth| depth.set(depth.get() + 1));
        CallbackScope
    }

    #[inline]
    fn active() -> bool {
        CALLBACK_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        CALLBACK_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

struct State<T> {
    stopped: bool,
    queue: DeadlineQueue,
    common: Option<CommonTimer<T>>,
    recurring: HashMap<RecurringKey, Arc<RecurringTimer<T>>>,
    recurring_created: u64,
    recurring_cancelled: u64,
}

struct Shared<D: TimerDriver, R: Reactor> {
    id: SchedulerId,
    scope: TimerScope,
    driver: Arc<D>,
    reactor: Arc<R>,
    clock: Arc<dyn Clock>,
    state: Mutex<State<D::Descriptor>>,
    next_recurring: AtomicU64,
    recurring_fired: AtomicU64,
    /// Admits one-shot callbacks popped from the queue
    oneshot_gate: FireGate,
    /// Popped one-shots skipped because `stop` closed the gate first
    oneshot_skipped: AtomicU64,
}

/// Timer scheduler backed by reactor-polled OS timer descriptors
///
/// Dropping the scheduler stops it.
///
/// # Example
///
/// ```ignore
/// use ktimer_runtime::timer::ReactorTimer;
/// use ktimer_core::{Cookie, TimerScheduler, TimerScope};
///
/// let timer = ReactorTimer::new(TimerScope::Thread(0), driver, reactor);
/// let handle = timer.schedule_once(Duration::from_millis(50), Cookie::none(), |_| {
///     tracing::info!("fired");
/// })?;
/// timer.cancel(&handle)?;
/// ```
pub struct ReactorTimer<D: TimerDriver, R: Reactor> {
    shared: Arc<Shared<D, R>>,
}

impl<D: TimerDriver, R: Reactor> ReactorTimer<D, R> {
    /// Create a scheduler reading the process monotonic clock
    pub fn new(scope: TimerScope, driver: Arc<D>, reactor: Arc<R>) -> Self {
        Self::with_clock(scope, driver, reactor, Arc::new(MonotonicClock))
    }

    /// Create a scheduler reading time from `clock`
    ///
    /// The clock must agree with the one the driver's descriptors run on.
    pub fn with_clock(
        scope: TimerScope,
        driver: Arc<D>,
        reactor: Arc<R>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let id = SchedulerId::next();
        debug!(
            scheduler = %id,
            scope = scope.name(),
            driver = driver.name(),
            "timer scheduler created"
        );
        Self {
            shared: Arc::new(Shared {
                id,
                scope,
                driver,
                reactor,
                clock,
                state: Mutex::new(State {
                    stopped: false,
                    queue: DeadlineQueue::new(),
                    common: None,
                    recurring: HashMap::new(),
                    recurring_created: 0,
                    recurring_cancelled: 0,
                }),
                next_recurring: AtomicU64::new(1),
                recurring_fired: AtomicU64::new(0),
                oneshot_gate: FireGate::new(),
                oneshot_skipped: AtomicU64::new(0),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> SchedulerId {
        self.shared.id
    }

    /// Earliest pending one-shot deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.shared.state.lock().queue.peek_min()
    }

    /// Deadline the shared descriptor is programmed for
    ///
    /// Equals [`next_deadline`](Self::next_deadline) whenever the queue is
    /// non-empty; None while disarmed.
    pub fn armed_deadline(&self) -> Option<Instant> {
        self.shared
            .state
            .lock()
            .common
            .as_ref()
            .and_then(|c| c.armed)
    }

    /// Descriptor multiplexing the one-shot timers, once created
    pub fn shared_descriptor(&self) -> Option<RawDescriptor> {
        self.shared
            .state
            .lock()
            .common
            .as_ref()
            .map(|c| c.descriptor.raw())
    }

    /// Dedicated descriptors of the active recurring timers
    pub fn recurring_descriptors(&self) -> Vec<RawDescriptor> {
        let state = self.shared.state.lock();
        let mut raws: Vec<_> = state.recurring.values().map(|t| t.descriptor.raw()).collect();
        raws.sort_unstable();
        raws
    }

    /// Whether a one-shot handle still refers to a pending entry
    pub fn is_pending(&self, handle: &TimerHandle) -> bool {
        match handle {
            TimerHandle::Queued { owner, key } if *owner == self.shared.id => {
                self.shared.state.lock().queue.contains(key)
            }
            TimerHandle::Recurring { owner, key } if *owner == self.shared.id => {
                self.shared.state.lock().recurring.contains_key(key)
            }
            _ => false,
        }
    }

    /// Statistics snapshot
    pub fn stats(&self) -> TimerStats {
        let state = self.shared.state.lock();
        let queue = state.queue.stats();
        let skipped = self.shared.oneshot_skipped.load(Ordering::Relaxed);
        TimerStats {
            pending_oneshots: queue.pending,
            active_recurring: state.recurring.len(),
            total_scheduled: queue.total_inserted + state.recurring_created,
            total_fired: queue.total_fired - skipped
                + self.shared.recurring_fired.load(Ordering::Relaxed),
            total_cancelled: queue.total_cancelled + state.recurring_cancelled,
            total_discarded: queue.total_discarded + skipped,
        }
    }

    fn schedule_oneshot(
        &self,
        delay: Duration,
        cookie: Cookie,
        callback: TimerFn,
    ) -> TimerResult<TimerHandle> {
        let shared = &self.shared;
        let entry = DeadlineEntry::after(shared.clock.now(), delay, cookie, callback, shared.id)
            .ok_or(TimerError::InvalidArgument("delay overflows the monotonic clock"))?;

        let mut state = shared.state.lock();
        if state.stopped {
            return Err(TimerError::Stopped);
        }
        if state.common.is_none() {
            state.common = Some(shared.setup_common()?);
        }

        let key = state.queue.insert(entry);
        if let Err(e) = shared.sync_common(&mut state) {
            state.queue.retract(&key);
            return Err(e);
        }

        trace!(scheduler = %shared.id, seq = key.seq(), ?delay, "one-shot timer scheduled");
        Ok(TimerHandle::Queued {
            owner: shared.id,
            key,
        })
    }

    fn schedule_periodic(
        &self,
        period: Duration,
        cookie: Cookie,
        callback: TimerFn,
    ) -> TimerResult<TimerHandle> {
        let shared = &self.shared;
        if period.is_zero() {
            return Err(TimerError::InvalidArgument("recurring period must be non-zero"));
        }
        let threads = shared.scope_threads()?;

        let descriptor = shared
            .driver
            .create(DescriptorMode::Periodic(period))
            .map_err(|e| TimerError::descriptor("create", e))?;
        let key = RecurringKey(shared.next_recurring.fetch_add(1, Ordering::Relaxed));
        let timer = Arc::new(RecurringTimer::new(
            key,
            period,
            cookie,
            callback,
            descriptor,
            threads.len(),
        ));

        // Publish before registering so the first notification finds it
        {
            let mut state = shared.state.lock();
            if state.stopped {
                return Err(TimerError::Stopped);
            }
            state.recurring.insert(key, timer.clone());
        }

        for &thread in &threads {
            let notify = shared.recurring_notify(key);
            match shared
                .reactor
                .register_descriptor(thread, timer.descriptor.raw(), notify)
            {
                Ok(registration) => timer.registrations.lock().push(registration),
                Err(e) => {
                    let err = TimerError::registration(thread, e);
                    warn!(
                        scheduler = %shared.id,
                        thread,
                        error = %err,
                        "recurring timer registration failed"
                    );
                    shared.state.lock().recurring.remove(&key);
                    timer.gate.close();
                    let mut errors = Vec::new();
                    timer.unregister_all(shared.reactor.as_ref(), &mut errors);
                    for leftover in errors {
                        warn!(
                            scheduler = %shared.id,
                            error = %leftover,
                            "rollback unregister failed"
                        );
                    }
                    return Err(err);
                }
            }
        }

        // A concurrent stop may have torn the set down while we registered
        {
            let mut state = shared.state.lock();
            if state.recurring.contains_key(&key) {
                state.recurring_created += 1;
            } else {
                drop(state);
                timer.gate.close();
                let mut errors = Vec::new();
                timer.unregister_all(shared.reactor.as_ref(), &mut errors);
                return Err(TimerError::Stopped);
            }
        }

        debug!(
            scheduler = %shared.id,
            key = key.0,
            fd = timer.descriptor.raw(),
            ?period,
            threads = threads.len(),
            "recurring timer scheduled"
        );
        Ok(TimerHandle::Recurring {
            owner: shared.id,
            key,
        })
    }

    fn cancel_recurring(&self, key: &RecurringKey) -> TimerResult<bool> {
        let shared = &self.shared;
        let timer = {
            let mut state = shared.state.lock();
            match state.recurring.remove(key) {
                Some(timer) => {
                    state.recurring_cancelled += 1;
                    timer
                }
                None => return Ok(false),
            }
        };

        timer.gate.close();
        let mut errors = Vec::new();
        timer.unregister_all(shared.reactor.as_ref(), &mut errors);
        debug!(
            scheduler = %shared.id,
            key = timer.key.0,
            period = ?timer.period,
            "recurring timer cancelled"
        );
        TimerError::from_teardown(errors).map(|()| true)
    }
}

impl<D: TimerDriver, R: Reactor> TimerScheduler for ReactorTimer<D, R> {
    fn schedule(
        &self,
        delay: Duration,
        recurring: bool,
        cookie: Cookie,
        callback: TimerFn,
    ) -> TimerResult<TimerHandle> {
        if recurring {
            self.schedule_periodic(delay, cookie, callback)
        } else {
            self.schedule_oneshot(delay, cookie, callback)
        }
    }

    fn cancel(&self, handle: &TimerHandle) -> TimerResult<bool> {
        let shared = &self.shared;
        match handle {
            TimerHandle::Null => Ok(false),
            _ if !handle.is_owned_by(shared.id) => {
                debug!(scheduler = %shared.id, %handle, "ignoring cancel of foreign handle");
                Ok(false)
            }
            TimerHandle::Queued { key, .. } => {
                let mut state = shared.state.lock();
                if state.queue.remove(key).is_none() {
                    return Ok(false);
                }
                // The entry is gone either way; a failed rearm only costs a spurious wakeup
                if let Err(e) = shared.sync_common(&mut state) {
                    warn!(scheduler = %shared.id, error = %e, "rearm after cancel failed");
                }
                trace!(scheduler = %shared.id, seq = key.seq(), "one-shot timer cancelled");
                Ok(true)
            }
            TimerHandle::Recurring { key, .. } => self.cancel_recurring(key),
        }
    }

    fn stop(&self) -> TimerResult<()> {
        let shared = &self.shared;
        let (discarded, recurring, common) = {
            let mut state = shared.state.lock();
            if state.stopped {
                return Ok(());
            }
            state.stopped = true;
            let discarded = state.queue.drain();
            let recurring: Vec<_> = state.recurring.drain().map(|(_, t)| t).collect();
            state.recurring_cancelled += recurring.len() as u64;
            (discarded, recurring, state.common.take())
        };

        debug!(
            scheduler = %shared.id,
            discarded = discarded.len(),
            recurring = recurring.len(),
            "stopping timer scheduler"
        );
        // Cookies may run arbitrary Drop code; release them outside the lock
        drop(discarded);
        shared.oneshot_gate.close();

        let mut errors = Vec::new();
        for timer in recurring {
            timer.gate.close();
            timer.unregister_all(shared.reactor.as_ref(), &mut errors);
        }
        if let Some(common) = common {
            if let Err(e) = common.descriptor.disarm() {
                errors.push(TimerError::descriptor("disarm", e));
            }
            unregister_all(shared.reactor.as_ref(), &common.registrations, &mut errors);
        }
        TimerError::from_teardown(errors)
    }

    fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }

    fn scope(&self) -> &TimerScope {
        &self.shared.scope
    }
}

impl<D: TimerDriver, R: Reactor> Drop for ReactorTimer<D, R> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(scheduler = %self.shared.id, error = %e, "timer teardown on drop failed");
        }
    }
}

impl<D: TimerDriver, R: Reactor> fmt::Debug for ReactorTimer<D, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ReactorTimer")
            .field("id", &self.shared.id)
            .field("scope", &self.shared.scope)
            .field("driver", &self.shared.driver.name())
            .field("stopped", &state.stopped)
            .field("pending_oneshots", &state.queue.len())
            .field("active_recurring", &state.recurring.len())
            .finish()
    }
}

impl<D: TimerDriver, R: Reactor> Shared<D, R> {
    fn scope_threads(&self) -> TimerResult<Vec<usize>> {
        let threads = self.scope.threads(&self.reactor.thread_ids());
        if threads.is_empty() {
            return Err(TimerError::InvalidArgument("scope selects no reactor thread"));
        }
        Ok(threads)
    }

    /// Create and register the shared descriptor
    ///
    /// On failure nothing stays registered and the descriptor is closed.
    fn setup_common(self: &Arc<Self>) -> TimerResult<CommonTimer<D::Descriptor>> {
        let threads = self.scope_threads()?;
        let descriptor = self
            .driver
            .create(DescriptorMode::Shared)
            .map_err(|e| TimerError::descriptor("create", e))?;

        let mut registrations = Vec::with_capacity(threads.len());
        for thread in threads {
            match self
                .reactor
                .register_descriptor(thread, descriptor.raw(), self.common_notify())
            {
                Ok(registration) => registrations.push(registration),
                Err(e) => {
                    let mut errors = Vec::new();
                    unregister_all(self.reactor.as_ref(), &registrations, &mut errors);
                    for leftover in errors {
                        warn!(
                            scheduler = %self.id,
                            error = %leftover,
                            "rollback unregister failed"
                        );
                    }
                    return Err(TimerError::registration(thread, e));
                }
            }
        }

        debug!(
            scheduler = %self.id,
            fd = descriptor.raw(),
            threads = registrations.len(),
            "shared timer descriptor ready"
        );
        Ok(CommonTimer {
            descriptor: Arc::new(descriptor),
            registrations,
            armed: None,
        })
    }

    /// Program the shared descriptor for the queue minimum, or disarm it
    fn sync_common(&self, state: &mut State<D::Descriptor>) -> TimerResult<()> {
        let target = state.queue.peek_min();
        let Some(common) = state.common.as_mut() else {
            return Ok(());
        };
        if common.armed == target {
            return Ok(());
        }

        match target {
            Some(expiry) => {
                let delay = expiry
                    .saturating_duration_since(self.clock.now())
                    .max(MIN_ARM_DELAY);
                common
                    .descriptor
                    .arm(delay)
                    .map_err(|e| TimerError::descriptor("arm", e))?;
            }
            None => common
                .descriptor
                .disarm()
                .map_err(|e| TimerError::descriptor("disarm", e))?,
        }
        common.armed = target;
        Ok(())
    }

    fn common_notify(self: &Arc<Self>) -> NotifyFn {
        let weak: Weak<Self> = Arc::downgrade(self);
        Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_common_ready();
            }
        })
    }

    fn recurring_notify(self: &Arc<Self>, key: RecurringKey) -> NotifyFn {
        let weak: Weak<Self> = Arc::downgrade(self);
        Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_recurring_ready(key);
            }
        })
    }

    /// Shared descriptor readable: fire every due one-shot
    fn on_common_ready(&self) {
        let descriptor = {
            let state = self.state.lock();
            match state.common.as_ref() {
                Some(common) if !state.stopped => common.descriptor.clone(),
                _ => return,
            }
        };

        let expirations = match descriptor.read_and_ack() {
            Ok(n) => n,
            Err(e) => {
                warn!(scheduler = %self.id, error = %e, "shared timer descriptor read failed");
                0
            }
        };

        let due = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            if expirations > 0 {
                // The one-shot expiration is spent
                if let Some(common) = state.common.as_mut() {
                    common.armed = None;
                }
            }
            let due = state.queue.pop_all_due(self.clock.now());
            if let Err(e) = self.sync_common(&mut state) {
                warn!(scheduler = %self.id, error = %e, "rearm of shared timer descriptor failed");
            }
            due
        };
        if due.is_empty() {
            return;
        }

        trace!(scheduler = %self.id, count = due.len(), "firing due one-shot timers");
        let mut first_panic = None;
        for entry in due {
            let Some(running) = self.oneshot_gate.enter() else {
                self.oneshot_skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| entry.fire())) {
                warn!(scheduler = %self.id, "one-shot timer callback panicked");
                first_panic.get_or_insert(payload);
            }
            drop(running);
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }

    /// Dedicated descriptor readable: run that timer's callback
    fn on_recurring_ready(&self, key: RecurringKey) {
        let timer = {
            let state = self.state.lock();
            if state.stopped {
                return;
            }
            match state.recurring.get(&key) {
                Some(timer) => timer.clone(),
                None => return,
            }
        };

        match timer.descriptor.read_and_ack() {
            // Another reactor thread consumed this tick
            Ok(0) => {}
            Ok(_) => {
                if timer.fire() {
                    self.recurring_fired.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                warn!(
                    scheduler = %self.id,
                    key = key.0,
                    error = %e,
                    "recurring timer descriptor read failed"
                );
            }
        }
    }
}

fn unregister_all<R: Reactor>(
    reactor: &R,
    registrations: &[Registration],
    errors: &mut Vec<TimerError>,
) {
    for registration in registrations {
        if let Err(e) = reactor.unregister_descriptor(registration) {
            warn!(%registration, error = %e, "timer descriptor unregister failed");
            errors.push(TimerError::registration(registration.thread, e));
        }
    }
}
