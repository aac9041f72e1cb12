//! Tracing subscriber bootstrap.
//!
//! Hosts embedding the engine call [`init`] once at startup; the filter
//! defaults to `info` and is overridable through `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
