//! Environment variable utilities
//!
//! Typed lookups with defaults, used by the runtime configuration layer.
//!
//! ```ignore
//! use ktimer_core::env::{env_get, env_get_millis, env_get_str};
//!
//! let threads: usize = env_get("KTIMER_REACTOR_THREADS", 2);
//! let poll = env_get_millis("KTIMER_POLL_TIMEOUT_MS", Duration::from_millis(100));
//! let name = env_get_str("KTIMER_THREAD_NAME", "ktimer-reactor");
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as type T, or return default
///
/// Unset variables and values that fail to parse both yield `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as optional value
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as string, or return default
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get environment variable holding a millisecond count as a `Duration`
#[inline]
pub fn env_get_millis(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__KTIMER_UNSET_VAR__", 42);
        assert_eq!(val, 42);
        assert_eq!(env_get_str("__KTIMER_UNSET_VAR__", "hello"), "hello");
        assert!(env_get_opt::<u32>("__KTIMER_UNSET_VAR__").is_none());
    }

    #[test]
    fn test_env_get_with_set_var() {
        std::env::set_var("__KTIMER_TEST_NUM__", " 123 ");
        let val: usize = env_get("__KTIMER_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__KTIMER_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__KTIMER_TEST_INVALID__", "not_a_number");
        let val: usize = env_get("__KTIMER_TEST_INVALID__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__KTIMER_TEST_INVALID__");
    }

    #[test]
    fn test_env_get_millis() {
        std::env::set_var("__KTIMER_TEST_MS__", "250");
        assert_eq!(
            env_get_millis("__KTIMER_TEST_MS__", Duration::ZERO),
            Duration::from_millis(250)
        );
        std::env::remove_var("__KTIMER_TEST_MS__");
        assert_eq!(
            env_get_millis("__KTIMER_TEST_MS__", Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }
}
