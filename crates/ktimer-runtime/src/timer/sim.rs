//! Deterministic simulation of descriptors and reactor
//!
//! [`SimHarness`] wires a [`ManualClock`], a [`SimDriver`] and a
//! [`SimReactor`] together. Time only moves in [`SimHarness::advance`],
//! which steps through armed descriptor deadlines in order and dispatches
//! every registration of each descriptor that becomes ready, the way each
//! reactor thread polling it would.
//!
//! ```ignore
//! let sim = SimHarness::new(2);
//! let timer = ReactorTimer::with_clock(TimerScope::Thread(0), sim.driver(), sim.reactor(), sim.clock_arc());
//! timer.schedule_once(Duration::from_millis(10), Cookie::none(), |_| {})?;
//! sim.advance(Duration::from_millis(10));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ktimer_core::traits::RawDescriptor;
use ktimer_core::{
    Clock, DescriptorMode, ManualClock, NotifyFn, Reactor, ReactorThreadId, Registration,
    TimerDescriptor, TimerDriver,
};

/// First descriptor number handed out, clear of stdio
const FIRST_SIM_FD: RawDescriptor = 100;

#[derive(Debug, Default)]
struct SimTimer {
    deadline: Option<Instant>,
    period: Option<Duration>,
    pending: u64,
}

/// Kernel-side state of every open simulated descriptor
struct World {
    clock: ManualClock,
    timers: Mutex<BTreeMap<RawDescriptor, SimTimer>>,
    next_fd: AtomicI32,
    created: AtomicUsize,
    fail_creates: AtomicUsize,
    fail_arms: AtomicUsize,
}

impl World {
    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Earliest armed deadline at or before `limit`
    fn next_due(&self, limit: Instant) -> Option<(Instant, RawDescriptor)> {
        self.timers
            .lock()
            .iter()
            .filter_map(|(raw, t)| t.deadline.filter(|d| *d <= limit).map(|d| (d, *raw)))
            .min()
    }

    /// Record one expiration and move the deadline on
    fn expire(&self, raw: RawDescriptor, at: Instant) {
        if let Some(timer) = self.timers.lock().get_mut(&raw) {
            timer.pending += 1;
            timer.deadline = timer.period.map(|p| at + p);
        }
    }
}

/// Simulated timer descriptor
pub struct SimDescriptor {
    raw: RawDescriptor,
    world: Arc<World>,
}

impl TimerDescriptor for SimDescriptor {
    fn raw(&self) -> RawDescriptor {
        self.raw
    }

    fn arm(&self, delay: Duration) -> io::Result<()> {
        if World::take_failure(&self.world.fail_arms) {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated arm failure"));
        }
        let deadline = self.world.clock.now() + delay;
        let mut timers = self.world.timers.lock();
        let timer = timers
            .get_mut(&self.raw)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        timer.deadline = Some(deadline);
        timer.period = None;
        Ok(())
    }

    fn disarm(&self) -> io::Result<()> {
        let mut timers = self.world.timers.lock();
        let timer = timers
            .get_mut(&self.raw)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        timer.deadline = None;
        timer.period = None;
        Ok(())
    }

    fn read_and_ack(&self) -> io::Result<u64> {
        let mut timers = self.world.timers.lock();
        let timer = timers
            .get_mut(&self.raw)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        Ok(std::mem::take(&mut timer.pending))
    }
}

impl Drop for SimDescriptor {
    fn drop(&mut self) {
        self.world.timers.lock().remove(&self.raw);
    }
}

impl fmt::Debug for SimDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimDescriptor").field("raw", &self.raw).finish()
    }
}

/// Driver creating [`SimDescriptor`]s
pub struct SimDriver {
    world: Arc<World>,
}

impl TimerDriver for SimDriver {
    type Descriptor = SimDescriptor;

    fn create(&self, mode: DescriptorMode) -> io::Result<SimDescriptor> {
        if World::take_failure(&self.world.fail_creates) {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated descriptor exhaustion"));
        }
        let raw = self.world.next_fd.fetch_add(1, Ordering::Relaxed);
        let timer = match mode {
            DescriptorMode::Shared => SimTimer::default(),
            DescriptorMode::Periodic(period) => SimTimer {
                deadline: Some(self.world.clock.now() + period),
                period: Some(period),
                pending: 0,
            },
        };
        self.world.timers.lock().insert(raw, timer);
        self.world.created.fetch_add(1, Ordering::Relaxed);
        Ok(SimDescriptor {
            raw,
            world: self.world.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "sim"
    }
}

/// Reactor whose threads are simulated by [`SimHarness::advance`]
pub struct SimReactor {
    threads: Vec<ReactorThreadId>,
    registrations: Mutex<BTreeMap<u64, (Registration, NotifyFn)>>,
    next_token: AtomicU64,
    fail_on: Mutex<Option<ReactorThreadId>>,
}

impl SimReactor {
    fn new(threads: usize) -> Self {
        Self {
            threads: (0..threads).collect(),
            registrations: Mutex::new(BTreeMap::new()),
            next_token: AtomicU64::new(1),
            fail_on: Mutex::new(None),
        }
    }

    /// Make registrations on `thread` fail until cleared with None
    pub fn fail_registration_on(&self, thread: Option<ReactorThreadId>) {
        *self.fail_on.lock() = thread;
    }

    /// Total live registrations
    pub fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Threads `raw` is registered on, in registration order
    pub fn threads_of(&self, raw: RawDescriptor) -> Vec<ReactorThreadId> {
        self.registrations
            .lock()
            .values()
            .filter(|(r, _)| r.raw == raw)
            .map(|(r, _)| r.thread)
            .collect()
    }

    /// Snapshot so callbacks run without the table locked
    fn notifies_for(&self, raw: RawDescriptor) -> Vec<NotifyFn> {
        self.registrations
            .lock()
            .values()
            .filter(|(r, _)| r.raw == raw)
            .map(|(_, n)| n.clone())
            .collect()
    }
}

impl Reactor for SimReactor {
    fn thread_ids(&self) -> Vec<ReactorThreadId> {
        self.threads.clone()
    }

    fn register_descriptor(
        &self,
        thread: ReactorThreadId,
        raw: RawDescriptor,
        notify: NotifyFn,
    ) -> io::Result<Registration> {
        if !self.threads.contains(&thread) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such reactor thread"));
        }
        if *self.fail_on.lock() == Some(thread) {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated registration failure"));
        }
        let registration = Registration {
            thread,
            token: self.next_token.fetch_add(1, Ordering::Relaxed),
            raw,
        };
        self.registrations
            .lock()
            .insert(registration.token, (registration, notify));
        Ok(registration)
    }

    fn unregister_descriptor(&self, registration: &Registration) -> io::Result<()> {
        self.registrations
            .lock()
            .remove(&registration.token)
            .map(|_| ())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }
}

/// Clock, driver and reactor sharing one simulated world
pub struct SimHarness {
    clock: ManualClock,
    world: Arc<World>,
    driver: Arc<SimDriver>,
    reactor: Arc<SimReactor>,
}

impl SimHarness {
    /// Harness with `threads` reactor threads
    pub fn new(threads: usize) -> Self {
        let clock = ManualClock::new();
        let world = Arc::new(World {
            clock: clock.clone(),
            timers: Mutex::new(BTreeMap::new()),
            next_fd: AtomicI32::new(FIRST_SIM_FD),
            created: AtomicUsize::new(0),
            fail_creates: AtomicUsize::new(0),
            fail_arms: AtomicUsize::new(0),
        });
        Self {
            clock,
            driver: Arc::new(SimDriver {
                world: world.clone(),
            }),
            reactor: Arc::new(SimReactor::new(threads)),
            world,
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn clock_arc(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    pub fn driver(&self) -> Arc<SimDriver> {
        self.driver.clone()
    }

    pub fn reactor(&self) -> Arc<SimReactor> {
        self.reactor.clone()
    }

    #[inline]
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Move time forward by `by`, firing every descriptor that expires
    ///
    /// Each expiration is delivered at its own instant so callbacks observe
    /// the clock at their deadline.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.now() + by;
        while let Some((at, raw)) = self.world.next_due(target) {
            self.clock.set(at);
            self.world.expire(raw, at);
            for notify in self.reactor.notifies_for(raw) {
                notify();
            }
        }
        self.clock.set(target);
    }

    /// Descriptors created and not yet closed
    pub fn open_descriptors(&self) -> usize {
        self.world.timers.lock().len()
    }

    /// Descriptors ever created
    pub fn created_descriptors(&self) -> usize {
        self.world.created.load(Ordering::Relaxed)
    }

    /// Deadline `raw` is armed for
    pub fn armed_at(&self, raw: RawDescriptor) -> Option<Instant> {
        self.world.timers.lock().get(&raw).and_then(|t| t.deadline)
    }

    /// Fail the next `n` descriptor creations
    pub fn fail_next_creates(&self, n: usize) {
        self.world.fail_creates.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` arm calls
    pub fn fail_next_arms(&self, n: usize) {
        self.world.fail_arms.store(n, Ordering::SeqCst);
    }
}

impl fmt::Debug for SimHarness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimHarness")
            .field("now", &self.clock.now())
            .field("open_descriptors", &self.open_descriptors())
            .field("registrations", &self.reactor.registration_count())
            .finish()
    }
}
