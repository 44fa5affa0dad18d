//! Tracing setup
//!
//! Embedding drivers that do not install their own subscriber can call
//! [`init_tracing`] once at startup. A non-empty `SOVEREIGN_DEBUG`
//! environment variable selects verbose per-instruction tracing;
//! `RUST_LOG` still takes precedence when set.

use tracing_subscriber::EnvFilter;

/// Install a process-wide fmt subscriber. Idempotent: a second call
/// (or an already-installed subscriber) is a no-op.
pub fn init_tracing() {
    let verbose = std::env::var("SOVEREIGN_DEBUG").is_ok_and(|v| !v.is_empty());
    let default_level = if verbose { "trace" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
