//! Structured logging init. Call sites elsewhere use `tracing::{debug,info,warn,error}`
//! directly; this module only wires up the subscriber.

use tracing_subscriber::{EnvFilter, fmt};

/// Installs a global `tracing` subscriber reading `RUST_LOG` (defaults to `info`).
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
