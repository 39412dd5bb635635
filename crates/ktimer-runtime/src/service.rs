//! Timer service
//!
//! Owns one thread-scoped scheduler per reactor thread plus one global
//! scheduler per distinct set of selected threads, created on first use,
//! and routes cancellation by the handle's owner.
//!
//! ```ignore
//! let service = LinuxTimerService::start(ReactorConfig::from_env())?;
//!
//! // Fires on reactor thread 0 only
//! let h = service.schedule_thread_timer(0, Duration::from_millis(10), false, Cookie::none(), cb.clone())?;
//! // Fires on whichever of threads 1 and 2 wins the expiration
//! let g = service.schedule_global_timer(
//!     Duration::from_secs(1),
//!     true,
//!     Cookie::none(),
//!     ThreadSelector::Only(vec![1, 2]),
//!     cb,
//! )?;
//!
//! service.cancel_timer(&h)?;
//! service.cancel_timer(&g)?;
//! service.shutdown()?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use ktimer_core::{
    Clock, Cookie, MonotonicClock, Reactor, ReactorThreadId, SchedulerId, ThreadSelector,
    TimerDriver, TimerError, TimerFn, TimerHandle, TimerResult, TimerScheduler, TimerScope,
};

use crate::timer::{ReactorTimer, TimerStats};

/// Global schedulers keyed by the reactor threads they span
struct Globals<D: TimerDriver, R: Reactor> {
    stopped: bool,
    timers: BTreeMap<Vec<ReactorThreadId>, Arc<ReactorTimer<D, R>>>,
}

/// Per-thread and global timer schedulers over one reactor
pub struct TimerService<D: TimerDriver, R: Reactor> {
    driver: Arc<D>,
    reactor: Arc<R>,
    clock: Arc<dyn Clock>,
    threads: BTreeMap<ReactorThreadId, ReactorTimer<D, R>>,
    globals: Mutex<Globals<D, R>>,
}

impl<D: TimerDriver, R: Reactor> TimerService<D, R> {
    /// Service reading the process monotonic clock
    pub fn new(driver: Arc<D>, reactor: Arc<R>) -> Self {
        Self::with_clock(driver, reactor, Arc::new(MonotonicClock))
    }

    pub fn with_clock(driver: Arc<D>, reactor: Arc<R>, clock: Arc<dyn Clock>) -> Self {
        let threads: BTreeMap<_, _> = reactor
            .thread_ids()
            .into_iter()
            .map(|id| {
                let timer = ReactorTimer::with_clock(
                    TimerScope::Thread(id),
                    driver.clone(),
                    reactor.clone(),
                    clock.clone(),
                );
                (id, timer)
            })
            .collect();

        info!(threads = threads.len(), "timer service ready");
        Self {
            driver,
            reactor,
            clock,
            threads,
            globals: Mutex::new(Globals {
                stopped: false,
                timers: BTreeMap::new(),
            }),
        }
    }

    pub fn reactor(&self) -> &Arc<R> {
        &self.reactor
    }

    /// Scheduler bound to `thread`
    pub fn thread_timer(&self, thread: ReactorThreadId) -> TimerResult<&ReactorTimer<D, R>> {
        self.threads
            .get(&thread)
            .ok_or(TimerError::InvalidArgument("unknown reactor thread"))
    }

    /// Global scheduler spanning the threads `selector` picks, if one exists
    pub fn global_timer(&self, selector: &ThreadSelector) -> Option<Arc<ReactorTimer<D, R>>> {
        let threads = selector.select(&self.reactor.thread_ids());
        self.globals.lock().timers.get(&threads).cloned()
    }

    /// Schedule a timer whose callback runs on reactor thread `thread`
    pub fn schedule_thread_timer(
        &self,
        thread: ReactorThreadId,
        delay: Duration,
        recurring: bool,
        cookie: Cookie,
        callback: TimerFn,
    ) -> TimerResult<TimerHandle> {
        self.thread_timer(thread)?
            .schedule(delay, recurring, cookie, callback)
    }

    /// Schedule a timer whose callback runs on one of the threads `selector` picks
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `selector` picks no reactor thread, `Stopped`
    /// after [`shutdown`](Self::shutdown), and whatever the scheduler's
    /// `schedule` returns.
    pub fn schedule_global_timer(
        &self,
        delay: Duration,
        recurring: bool,
        cookie: Cookie,
        selector: ThreadSelector,
        callback: TimerFn,
    ) -> TimerResult<TimerHandle> {
        let timer = self.global_for(&selector)?;
        timer.schedule(delay, recurring, cookie, callback)
    }

    /// Cancel a timer issued by any scheduler of this service
    ///
    /// Null handles and handles from elsewhere return `Ok(false)`.
    pub fn cancel_timer(&self, handle: &TimerHandle) -> TimerResult<bool> {
        let Some(owner) = handle.owner() else {
            return Ok(false);
        };
        if let Some(local) = self.threads.values().find(|t| t.id() == owner) {
            return local.cancel(handle);
        }
        match self.find_global(owner) {
            Some(global) => global.cancel(handle),
            None => {
                debug!(%handle, "cancel of handle not issued by this service");
                Ok(false)
            }
        }
    }

    /// A reactor thread is going away: stop its scheduler
    pub fn reactor_stopped(&self, thread: ReactorThreadId) -> TimerResult<()> {
        debug!(thread, "stopping thread timers");
        self.thread_timer(thread)?.stop()
    }

    /// Stop every scheduler, attempting all even if some fail
    ///
    /// Global timers cannot be scheduled afterwards.
    pub fn shutdown(&self) -> TimerResult<()> {
        let globals: Vec<_> = {
            let mut globals = self.globals.lock();
            globals.stopped = true;
            globals.timers.values().cloned().collect()
        };

        let mut errors = Vec::new();
        let locals = self.threads.values();
        for scheduler in locals.chain(globals.iter().map(Arc::as_ref)) {
            if let Err(e) = scheduler.stop() {
                errors.push(e);
            }
        }
        info!(failed = errors.len(), "timer service shut down");
        TimerError::from_teardown(errors)
    }

    /// Sum of every scheduler's statistics
    pub fn stats(&self) -> TimerStats {
        let globals = self.global_snapshot();
        self.threads
            .values()
            .chain(globals.iter().map(Arc::as_ref))
            .map(ReactorTimer::stats)
            .fold(TimerStats::default(), |acc, s| TimerStats {
                pending_oneshots: acc.pending_oneshots + s.pending_oneshots,
                active_recurring: acc.active_recurring + s.active_recurring,
                total_scheduled: acc.total_scheduled + s.total_scheduled,
                total_fired: acc.total_fired + s.total_fired,
                total_cancelled: acc.total_cancelled + s.total_cancelled,
                total_discarded: acc.total_discarded + s.total_discarded,
            })
    }

    /// Global scheduler for `selector`, created on first use
    fn global_for(&self, selector: &ThreadSelector) -> TimerResult<Arc<ReactorTimer<D, R>>> {
        let threads = selector.select(&self.reactor.thread_ids());
        if threads.is_empty() {
            return Err(TimerError::InvalidArgument("selector picks no reactor thread"));
        }

        let mut globals = self.globals.lock();
        if globals.stopped {
            return Err(TimerError::Stopped);
        }
        if let Some(timer) = globals.timers.get(&threads) {
            return Ok(timer.clone());
        }

        let timer = Arc::new(ReactorTimer::with_clock(
            TimerScope::Global(ThreadSelector::Only(threads.clone())),
            self.driver.clone(),
            self.reactor.clone(),
            self.clock.clone(),
        ));
        debug!(scheduler = %timer.id(), ?threads, "global timer scheduler created");
        globals.timers.insert(threads, timer.clone());
        Ok(timer)
    }

    /// Cloned out of the lock: a cancel may wait on running callbacks
    fn find_global(&self, owner: SchedulerId) -> Option<Arc<ReactorTimer<D, R>>> {
        self.globals
            .lock()
            .timers
            .values()
            .find(|t| t.id() == owner)
            .cloned()
    }

    fn global_snapshot(&self) -> Vec<Arc<ReactorTimer<D, R>>> {
        self.globals.lock().timers.values().cloned().collect()
    }
}

impl<D: TimerDriver, R: Reactor> fmt::Debug for TimerService<D, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let globals = self.globals.lock();
        f.debug_struct("TimerService")
            .field("threads", &self.threads.keys().collect::<Vec<_>>())
            .field("globals", &globals.timers.keys().collect::<Vec<_>>())
            .field("stopped", &globals.stopped)
            .finish()
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        use crate::config::ReactorConfig;
        use crate::reactor::EpollReactor;
        use crate::timerfd::TimerFdDriver;

        /// Timer service over timerfd descriptors and the epoll reactor
        pub type LinuxTimerService = TimerService<TimerFdDriver, EpollReactor>;

        impl TimerService<TimerFdDriver, EpollReactor> {
            /// Start an epoll reactor and build a service on it
            pub fn start(config: ReactorConfig) -> TimerResult<Self> {
                let reactor = Arc::new(EpollReactor::start(config)?);
                Ok(Self::new(Arc::new(TimerFdDriver::new()), reactor))
            }
        }
    }
}
