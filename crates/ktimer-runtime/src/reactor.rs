//! # EpollReactor - readiness poller for timer descriptors
//!
//! Runs N dedicated OS threads, each owning an epoll instance. A
//! descriptor registered on a thread is polled for read readiness
//! (level-triggered) and its [`NotifyFn`] runs on that thread.
//!
//! Each thread loop:
//! 1. Waits on its epoll with a bounded timeout
//! 2. Maps every ready event's token to the registered callback
//! 3. Runs the callbacks outside the registration table lock
//! 4. Exits once the shutdown flag is observed

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::fd::BorrowedFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use ktimer_core::traits::RawDescriptor;
use ktimer_core::{NotifyFn, Reactor, ReactorThreadId, Registration, TimerError, TimerResult};

use crate::config::ReactorConfig;

/// State shared between the reactor handle and its threads
struct ReactorShared {
    config: ReactorConfig,
    /// One epoll per reactor thread, indexed by thread id
    polls: Vec<Epoll>,
    /// token -> callback
    table: RwLock<HashMap<u64, NotifyFn>>,
    next_token: AtomicU64,
    shutdown: AtomicBool,
}

impl ReactorShared {
    fn poll(&self, thread: ReactorThreadId) -> io::Result<&Epoll> {
        self.polls.get(thread).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no such reactor thread")
        })
    }
}

/// Multi-threaded epoll reactor
pub struct EpollReactor {
    shared: Arc<ReactorShared>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl EpollReactor {
    /// Create the epoll instances and start the polling threads
    pub fn start(config: ReactorConfig) -> TimerResult<Self> {
        config.validate()?;

        let polls = (0..config.num_threads)
            .map(|_| {
                Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
                    .map_err(|e| TimerError::descriptor("epoll_create", e.into()))
            })
            .collect::<TimerResult<Vec<_>>>()?;

        let shared = Arc::new(ReactorShared {
            config,
            polls,
            table: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        });

        let reactor = Self {
            shared: shared.clone(),
            threads: Mutex::new(Vec::with_capacity(shared.polls.len())),
        };

        for index in 0..shared.polls.len() {
            let thread_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", shared.config.thread_name, index))
                .spawn(move || poll_loop(&thread_shared, index));
            match spawned {
                Ok(handle) => reactor.threads.lock().push(handle),
                Err(e) => {
                    reactor.shutdown();
                    return Err(TimerError::descriptor("spawn", e));
                }
            }
        }

        info!(
            threads = shared.polls.len(),
            poll_timeout_ms = shared.config.poll_timeout_ms(),
            "epoll reactor started"
        );
        Ok(reactor)
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.shared.config
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        !self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Live registrations across all threads
    pub fn registration_count(&self) -> usize {
        self.shared.table.read().len()
    }

    /// Stop and join every polling thread
    ///
    /// Registrations stay in place; their callbacks no longer run.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        let current = thread::current().id();
        for handle in handles {
            // Dropped from one of our own callbacks: that thread exits by itself
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("reactor thread exited by panic");
            }
        }
        info!("epoll reactor stopped");
    }
}

impl Drop for EpollReactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for EpollReactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpollReactor")
            .field("threads", &self.shared.polls.len())
            .field("running", &self.is_running())
            .field("registrations", &self.registration_count())
            .finish()
    }
}

impl Reactor for EpollReactor {
    fn thread_ids(&self) -> Vec<ReactorThreadId> {
        if !self.is_running() {
            return Vec::new();
        }
        (0..self.shared.polls.len()).collect()
    }

    fn register_descriptor(
        &self,
        thread: ReactorThreadId,
        raw: RawDescriptor,
        notify: NotifyFn,
    ) -> io::Result<Registration> {
        if !self.is_running() {
            return Err(io::Error::new(io::ErrorKind::Other, "reactor is shut down"));
        }
        let poll = self.shared.poll(thread)?;
        let token = self.shared.next_token.fetch_add(1, Ordering::Relaxed);

        // Visible before the first event can arrive
        self.shared.table.write().insert(token, notify);

        // The caller owns the descriptor and keeps it open while registered
        let fd = unsafe { BorrowedFd::borrow_raw(raw) };
        if let Err(e) = poll.add(fd, EpollEvent::new(EpollFlags::EPOLLIN, token)) {
            self.shared.table.write().remove(&token);
            return Err(e.into());
        }

        debug!(thread, fd = raw, token, "descriptor registered");
        Ok(Registration { thread, token, raw })
    }

    fn unregister_descriptor(&self, registration: &Registration) -> io::Result<()> {
        let removed = self.shared.table.write().remove(&registration.token);
        if removed.is_none() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "unknown registration"));
        }
        let poll = self.shared.poll(registration.thread)?;
        let fd = unsafe { BorrowedFd::borrow_raw(registration.raw) };
        poll.delete(fd)?;
        debug!(%registration, "descriptor unregistered");
        Ok(())
    }
}

/// The polling loop of one reactor thread
fn poll_loop(shared: &ReactorShared, index: ReactorThreadId) {
    let Some(poll) = shared.polls.get(index) else {
        return;
    };
    let timeout = shared.config.poll_timeout_ms();
    let mut events = vec![EpollEvent::empty(); shared.config.max_events];
    let mut ready: Vec<NotifyFn> = Vec::with_capacity(shared.config.max_events);

    debug!(thread = index, "reactor thread started");

    while !shared.shutdown.load(Ordering::Acquire) {
        let n = match poll.wait(&mut events, timeout) {
            Ok(n) => n,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                error!(thread = index, error = %e, "epoll wait failed, reactor thread exiting");
                break;
            }
        };
        if n == 0 {
            continue;
        }

        // Tokens unregistered since the wait returned are skipped
        {
            let table = shared.table.read();
            ready.extend(events[..n].iter().filter_map(|ev| table.get(&ev.data()).cloned()));
        }

        for notify in ready.drain(..) {
            if panic::catch_unwind(AssertUnwindSafe(|| notify())).is_err() {
                error!(thread = index, "timer callback panicked");
            }
        }
    }

    debug!(thread = index, "reactor thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timerfd::TimerFdDriver;
    use ktimer_core::{DescriptorMode, TimerDescriptor, TimerDriver};
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn test_config(threads: usize) -> ReactorConfig {
        ReactorConfig::new()
            .num_threads(threads)
            .poll_timeout(Duration::from_millis(10))
            .thread_name("ktimer-test")
    }

    fn wait_for(deadline: Duration, cond: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_start_and_shutdown() {
        let reactor = EpollReactor::start(test_config(3)).unwrap();
        assert!(reactor.is_running());
        assert_eq!(reactor.thread_ids(), vec![0, 1, 2]);

        reactor.shutdown();
        assert!(!reactor.is_running());
        assert!(reactor.thread_ids().is_empty());
        // Idempotent
        reactor.shutdown();
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            EpollReactor::start(test_config(0)),
            Err(TimerError::Config(_))
        ));
    }

    #[test]
    fn test_readiness_runs_callback_on_reactor_thread() {
        let reactor = EpollReactor::start(test_config(2)).unwrap();
        let desc = TimerFdDriver.create(DescriptorMode::Shared).unwrap();
        let names = Arc::new(Mutex::new(Vec::new()));

        let (sink, d) = (names.clone(), Arc::new(desc));
        let d2 = d.clone();
        let reg = reactor
            .register_descriptor(
                1,
                d.raw(),
                Arc::new(move || {
                    let _ = d2.read_and_ack();
                    sink.lock().push(thread::current().name().map(String::from));
                }),
            )
            .unwrap();
        assert_eq!(reactor.registration_count(), 1);

        d.arm(Duration::from_millis(2)).unwrap();
        assert!(wait_for(Duration::from_secs(2), || !names.lock().is_empty()));
        assert_eq!(names.lock()[0].as_deref(), Some("ktimer-test-1"));

        reactor.unregister_descriptor(&reg).unwrap();
        assert_eq!(reactor.registration_count(), 0);
        assert!(reactor.unregister_descriptor(&reg).is_err());
    }

    #[test]
    fn test_register_on_unknown_thread_fails() {
        let reactor = EpollReactor::start(test_config(1)).unwrap();
        let desc = TimerFdDriver.create(DescriptorMode::Shared).unwrap();
        let err = reactor
            .register_descriptor(5, desc.raw(), Arc::new(|| {}))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(reactor.registration_count(), 0);
    }

    #[test]
    fn test_panicking_callback_keeps_thread_alive() {
        let reactor = EpollReactor::start(test_config(1)).unwrap();
        let desc = Arc::new(TimerFdDriver.create(DescriptorMode::Shared).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));

        let (d, c) = (desc.clone(), calls.clone());
        reactor
            .register_descriptor(
                0,
                desc.raw(),
                Arc::new(move || {
                    let _ = d.read_and_ack();
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first tick fails");
                    }
                }),
            )
            .unwrap();

        desc.arm(Duration::from_millis(1)).unwrap();
        assert!(wait_for(Duration::from_secs(2), || calls.load(Ordering::SeqCst) == 1));
        desc.arm(Duration::from_millis(1)).unwrap();
        assert!(wait_for(Duration::from_secs(2), || calls.load(Ordering::SeqCst) == 2));
    }
}
