//! Logging setup
//!
//! The library only emits `tracing` events; binaries and tests call
//! [`init`] to install a formatting subscriber.
//!
//! # Environment Variables
//!
//! - `KTIMER_LOG=<filter>` - Full `EnvFilter` directive, e.g. `ktimer_runtime=debug`
//! - `KTIMER_LOG_LEVEL=<level>` - Used when `KTIMER_LOG` is unset:
//!   0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace (names also accepted)

use tracing_subscriber::EnvFilter;

use ktimer_core::env::env_get_str;

/// Level used when neither variable is set
pub const DEFAULT_LEVEL: &str = "warn";

/// Map a `KTIMER_LOG_LEVEL` value to a filter directive
///
/// Unknown values fall back to [`DEFAULT_LEVEL`].
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "0" | "off" => "off",
        "1" | "error" => "error",
        "2" | "warn" => "warn",
        "3" | "info" => "info",
        "4" | "debug" => "debug",
        "5" | "trace" => "trace",
        _ => DEFAULT_LEVEL,
    }
}

fn filter_from_env() -> EnvFilter {
    EnvFilter::try_from_env("KTIMER_LOG").unwrap_or_else(|_| {
        let level = env_get_str("KTIMER_LOG_LEVEL", DEFAULT_LEVEL);
        EnvFilter::new(level_directive(&level))
    })
}

/// Install a global fmt subscriber filtered from the environment
///
/// Returns false if a subscriber was already installed; calling it more
/// than once is harmless.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter_from_env())
        .with_thread_names(true)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Like [`init`] but writes through the test harness capture
pub fn init_for_tests() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter_from_env())
        .with_test_writer()
        .try_init()
        .is_ok()
}
