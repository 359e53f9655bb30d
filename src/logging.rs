//! Log output setup
//!
//! The library only emits `tracing` events; installing a subscriber is
//! left to the application. [`init`] is the one the `dlb` binary uses.

use once_cell::sync::OnceCell;
use tracing_subscriber::filter::EnvFilter;

/// Environment variable that overrides the configured filter
pub const LOG_ENV: &str = "DLBRIDGE_LOG";

static INSTALLED: OnceCell<bool> = OnceCell::new();

/// Build the filter: `DLBRIDGE_LOG` if set and valid, else `default`.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install a stderr fmt subscriber.
///
/// Only the first call installs anything. Returns whether a subscriber from
/// this crate is active (false if another global subscriber was already set).
pub fn init(default_filter: &str) -> bool {
    *INSTALLED.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter(default_filter))
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
            .is_ok()
    })
}
