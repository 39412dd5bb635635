//! Error types for the timer subsystem

use std::io;

use thiserror::Error;

use crate::scope::ReactorThreadId;

/// Result type for timer operations
pub type TimerResult<T> = Result<T, TimerError>;

/// Errors that can occur in timer operations
///
/// All errors are returned synchronously to the immediate caller.
/// Cancelling a stale handle is not an error.
#[derive(Debug, Error)]
pub enum TimerError {
    /// Rejected at `schedule`, no state was mutated
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// `schedule` called after `stop`
    #[error("timer scheduler is stopped")]
    Stopped,

    /// The OS timer primitive failed
    #[error("timer descriptor {op} failed: {source}")]
    Descriptor {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Adding or removing a descriptor from a reactor thread failed
    #[error("reactor thread {thread} registration failed: {source}")]
    Registration {
        thread: ReactorThreadId,
        #[source]
        source: io::Error,
    },

    /// One or more teardown steps failed; every step was still attempted
    #[error("timer teardown finished with {} error(s)", .0.len())]
    Teardown(Vec<TimerError>),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TimerError {
    /// Wrap an I/O error from a descriptor operation
    #[inline]
    pub fn descriptor(op: &'static str, source: io::Error) -> Self {
        TimerError::Descriptor { op, source }
    }

    /// Wrap an I/O error from a reactor registration
    #[inline]
    pub fn registration(thread: ReactorThreadId, source: io::Error) -> Self {
        TimerError::Registration { thread, source }
    }

    /// Collapse collected teardown errors into a result
    pub fn from_teardown(mut errors: Vec<TimerError>) -> TimerResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(TimerError::Teardown(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = TimerError::Stopped;
        assert_eq!(format!("{}", e), "timer scheduler is stopped");

        let e = TimerError::descriptor("arm", io::Error::from_raw_os_error(24));
        assert!(format!("{}", e).starts_with("timer descriptor arm failed"));
    }

    #[test]
    fn test_from_teardown() {
        assert!(TimerError::from_teardown(Vec::new()).is_ok());

        let single = vec![TimerError::registration(1, io::Error::from_raw_os_error(9))];
        assert!(matches!(
            TimerError::from_teardown(single),
            Err(TimerError::Registration { thread: 1, .. })
        ));

        let many = vec![
            TimerError::registration(0, io::Error::from_raw_os_error(9)),
            TimerError::registration(1, io::Error::from_raw_os_error(9)),
        ];
        match TimerError::from_teardown(many) {
            Err(TimerError::Teardown(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}
