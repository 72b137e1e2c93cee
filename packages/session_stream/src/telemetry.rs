use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive`. Returns false when a global subscriber was already
/// set, so tests and embedding hosts can call it freely.
pub fn init_tracing(default_directive: &str) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .try_init()
        .is_ok()
}
