//! Shared bootstrap for the stage consumer binaries.

use tracing_subscriber::EnvFilter;

/// Initialise tracing for a consumer process.
///
/// `LOG_LEVEL` takes precedence, then `RUST_LOG`, then `info`.
pub fn init_tracing() {
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level.to_lowercase()).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
