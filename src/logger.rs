use crate::config::DEFAULT_LOG_FILTER;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber with timestamps.
///
/// `RUST_LOG` wins over the build-profile default. Safe to call more than
/// once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let installed = fmt()
        .with_env_filter(filter)
        .with_target(cfg!(debug_assertions))
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(filter = DEFAULT_LOG_FILTER, "logging initialised");
    }
}

/// Subscriber for tests; output is captured by the harness
pub fn init_for_tests() {
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("peerchat_lib=debug")))
        .with_test_writer()
        .try_init();
}
