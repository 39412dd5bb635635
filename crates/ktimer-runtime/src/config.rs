//! Reactor configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use ktimer_runtime::config::ReactorConfig;
//!
//! // Defaults with env overrides
//! let config = ReactorConfig::from_env();
//!
//! // Or customize programmatically
//! let config = ReactorConfig::new()
//!     .num_threads(4)
//!     .poll_timeout(Duration::from_millis(50));
//! config.validate()?;
//! ```

use std::time::Duration;

use ktimer_core::constants::{DEFAULT_REACTOR_THREADS, MAX_REACTOR_THREADS};
use ktimer_core::env::{env_get, env_get_millis, env_get_str};
use ktimer_core::{TimerError, TimerResult};

/// Compile-time defaults
pub mod defaults {
    /// Upper bound on one epoll wait; shutdown is noticed within this
    pub const POLL_TIMEOUT_MS: u64 = 100;
    /// Events drained per epoll wait
    pub const MAX_EVENTS: usize = 64;
    /// Reactor thread name prefix
    pub const THREAD_NAME: &str = "ktimer-reactor";
}

/// Configuration of an epoll reactor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Number of polling threads
    pub num_threads: usize,
    /// Upper bound on a single poll wait
    pub poll_timeout: Duration,
    /// Events drained per wait
    pub max_events: usize,
    /// Thread name prefix; threads are named `{prefix}-{index}`
    pub thread_name: String,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ReactorConfig {
    /// Defaults with environment overrides
    ///
    /// Environment variables (all optional):
    /// - `KTIMER_REACTOR_THREADS` - Number of reactor threads
    /// - `KTIMER_POLL_TIMEOUT_MS` - Poll wait bound in milliseconds
    /// - `KTIMER_MAX_EVENTS` - Events per wait
    /// - `KTIMER_THREAD_NAME` - Thread name prefix
    pub fn from_env() -> Self {
        Self {
            num_threads: env_get("KTIMER_REACTOR_THREADS", DEFAULT_REACTOR_THREADS),
            poll_timeout: env_get_millis(
                "KTIMER_POLL_TIMEOUT_MS",
                Duration::from_millis(defaults::POLL_TIMEOUT_MS),
            ),
            max_events: env_get("KTIMER_MAX_EVENTS", defaults::MAX_EVENTS),
            thread_name: env_get_str("KTIMER_THREAD_NAME", defaults::THREAD_NAME),
        }
    }

    /// Defaults only, ignoring the environment
    pub fn new() -> Self {
        Self {
            num_threads: DEFAULT_REACTOR_THREADS,
            poll_timeout: Duration::from_millis(defaults::POLL_TIMEOUT_MS),
            max_events: defaults::MAX_EVENTS,
            thread_name: defaults::THREAD_NAME.to_string(),
        }
    }

    pub fn num_threads(mut self, n: usize) -> Self {
        self.num_threads = n;
        self
    }

    pub fn poll_timeout(mut self, d: Duration) -> Self {
        self.poll_timeout = d;
        self
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Poll timeout in whole milliseconds, clamped to what epoll accepts
    pub fn poll_timeout_ms(&self) -> u16 {
        u16::try_from(self.poll_timeout.as_millis()).unwrap_or(u16::MAX)
    }

    /// Validate configuration
    pub fn validate(&self) -> TimerResult<()> {
        if self.num_threads == 0 {
            return Err(TimerError::Config("num_threads must be at least 1".into()));
        }
        if self.num_threads > MAX_REACTOR_THREADS {
            return Err(TimerError::Config(format!(
                "num_threads {} exceeds maximum {}",
                self.num_threads, MAX_REACTOR_THREADS
            )));
        }
        if self.poll_timeout.is_zero() {
            return Err(TimerError::Config("poll_timeout must be non-zero".into()));
        }
        if self.max_events == 0 {
            return Err(TimerError::Config("max_events must be at least 1".into()));
        }
        if self.thread_name.is_empty() {
            return Err(TimerError::Config("thread_name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ReactorConfig::new();
        assert_eq!(config.num_threads, DEFAULT_REACTOR_THREADS);
        assert_eq!(config.thread_name, "ktimer-reactor");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ReactorConfig::new()
            .num_threads(4)
            .poll_timeout(Duration::from_millis(20))
            .max_events(8)
            .thread_name("timers");

        assert_eq!(config.num_threads, 4);
        assert_eq!(config.poll_timeout_ms(), 20);
        assert_eq!(config.max_events, 8);
        assert_eq!(config.thread_name, "timers");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ReactorConfig::new().num_threads(0).validate().is_err());
        assert!(ReactorConfig::new()
            .num_threads(MAX_REACTOR_THREADS + 1)
            .validate()
            .is_err());
        assert!(ReactorConfig::new()
            .poll_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ReactorConfig::new().max_events(0).validate().is_err());
        assert!(matches!(
            ReactorConfig::new().thread_name("").validate(),
            Err(TimerError::Config(_))
        ));
    }

    #[test]
    fn test_poll_timeout_clamped() {
        let config = ReactorConfig::new().poll_timeout(Duration::from_secs(3600));
        assert_eq!(config.poll_timeout_ms(), u16::MAX);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("KTIMER_MAX_EVENTS", "17");
        let config = ReactorConfig::from_env();
        std::env::remove_var("KTIMER_MAX_EVENTS");
        assert_eq!(config.max_events, 17);
    }
}
