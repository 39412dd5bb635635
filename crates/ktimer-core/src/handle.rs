//! Timer handle
//!
//! One handle type covers both timer classes: a one-shot timer is named by
//! its position in the owning scheduler's deadline queue, a recurring timer
//! by the key of its dedicated descriptor record. Callers pass the handle
//! back to `cancel` without knowing which class they hold.

use std::fmt;

use crate::entry::SchedulerId;
use crate::queue::QueueKey;

/// Identity of a recurring timer within its scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecurringKey(pub u64);

/// Capability to cancel a scheduled timer
///
/// Valid once: after the timer fires (one-shot) or is cancelled, passing
/// the handle to `cancel` again is a harmless no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimerHandle {
    /// Refers to no timer; cancelling it does nothing
    #[default]
    Null,

    /// One-shot timer pending in a deadline queue
    Queued { owner: SchedulerId, key: QueueKey },

    /// Recurring timer owning a dedicated descriptor
    Recurring { owner: SchedulerId, key: RecurringKey },
}

impl TimerHandle {
    /// Scheduler that issued this handle
    #[inline]
    pub fn owner(&self) -> Option<SchedulerId> {
        match self {
            TimerHandle::Null => None,
            TimerHandle::Queued { owner, .. } | TimerHandle::Recurring { owner, .. } => {
                Some(*owner)
            }
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, TimerHandle::Null)
    }

    #[inline]
    pub fn is_recurring(&self) -> bool {
        matches!(self, TimerHandle::Recurring { .. })
    }

    /// True if `scheduler` issued this handle
    #[inline]
    pub fn is_owned_by(&self, scheduler: SchedulerId) -> bool {
        self.owner() == Some(scheduler)
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerHandle::Null => f.write_str("timer(null)"),
            TimerHandle::Queued { owner, key } => {
                write!(f, "timer({}/oneshot#{})", owner, key.seq())
            }
            TimerHandle::Recurring { owner, key } => {
                write!(f, "timer({}/recurring#{})", owner, key.0)
            }
        }
    }
}
