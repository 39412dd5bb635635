//! Scheduling scope
//!
//! A thread scope confines a scheduler's descriptors to one reactor
//! thread. A global scope replicates every descriptor registration across
//! the selected reactor threads.

/// Index of a reactor thread within its reactor
pub type ReactorThreadId = usize;

/// Which reactor threads a global scheduler spans
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ThreadSelector {
    /// Every reactor thread
    #[default]
    All,
    /// Only the listed threads
    Only(Vec<ReactorThreadId>),
}

impl ThreadSelector {
    /// Filter the reactor's threads down to the selected ones
    pub fn select(&self, available: &[ReactorThreadId]) -> Vec<ReactorThreadId> {
        match self {
            ThreadSelector::All => available.to_vec(),
            ThreadSelector::Only(wanted) => available
                .iter()
                .copied()
                .filter(|t| wanted.contains(t))
                .collect(),
        }
    }
}

/// Scope of a timer scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerScope {
    /// Bound to one reactor thread
    Thread(ReactorThreadId),
    /// Replicated across reactor threads
    Global(ThreadSelector),
}

impl TimerScope {
    #[inline]
    pub fn is_thread_local(&self) -> bool {
        matches!(self, TimerScope::Thread(_))
    }

    /// Reactor threads a descriptor of this scope must be registered on
    pub fn threads(&self, available: &[ReactorThreadId]) -> Vec<ReactorThreadId> {
        match self {
            TimerScope::Thread(id) => vec![*id],
            TimerScope::Global(selector) => selector.select(available),
        }
    }

    /// Short label for logs
    pub fn name(&self) -> &'static str {
        match self {
            TimerScope::Thread(_) => "thread",
            TimerScope::Global(_) => "global",
        }
    }
}
