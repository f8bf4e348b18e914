//! Tracing setup.
//!
//! One fmt subscriber with an env-filter; `RUST_LOG` overrides the
//! default `info` level. Execution-visible log lines are additionally
//! captured into the execution record by the node executor — this layer
//! is for operators, that one is for users.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
