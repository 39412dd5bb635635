//! Timer subsystem
//!
//! [`ReactorTimer`] implements the [`TimerScheduler`](ktimer_core::TimerScheduler)
//! contract on top of any [`TimerDriver`](ktimer_core::TimerDriver) and
//! [`Reactor`](ktimer_core::Reactor). On Linux those are the timerfd driver
//! and the epoll reactor; tests plug in the simulated pair from [`sim`].
//!
//! # Architecture
//!
//! ```text
//!            schedule(delay, recurring=false)      schedule(delay, recurring=true)
//!                         │                                     │
//!                         ▼                                     ▼
//!              ┌─────────────────────┐               ┌─────────────────────┐
//!              │   DeadlineQueue     │               │  periodic descriptor│  one per timer
//!              │ (expiry, seq) -> fn │               │  (kernel re-arms)   │
//!              └─────────────────────┘               └─────────────────────┘
//!                         │ min                                 │
//!                         ▼                                     │
//!              ┌─────────────────────┐                          │
//!              │  shared descriptor  │  one per scheduler       │
//!              └─────────────────────┘                          │
//!                         │ readable                            │ readable
//!                         ▼                                     ▼
//!             reactor thread(s) ──► pop_all_due + rearm    reactor thread(s) ──► callback
//! ```
//!
//! A thread-scoped scheduler registers its descriptors on one reactor
//! thread. A global one registers each descriptor on every selected
//! thread; whichever thread reads the expiration count first runs the
//! callbacks, the others read zero and skip.

mod engine;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use engine::{ReactorTimer, TimerStats};
