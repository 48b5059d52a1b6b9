//! Structured logging setup, shared by the scanner binary.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber from a filter directive string,
/// e.g. the value of `--log-filter`/`LOG_FILTER`. Falls back to the filter
/// if the string fails to parse instead of panicking, so a typo in an
/// operator-supplied env var doesn't take the whole process down before a
/// single log line is emitted.
pub fn initialize(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .ok();
}
