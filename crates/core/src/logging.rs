//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "info,ember=debug,gpu_allocator=warn";

/// Initialize tracing with the filter from `RUST_LOG`, falling back to
/// `info,ember=debug`.
///
/// # Example
/// ```no_run
/// ember_core::init_logging();
/// tracing::info!("Renderer initialized");
/// ```
pub fn init_logging() {
    init_logging_with(None);
}

/// Initialize tracing, preferring `RUST_LOG`, then `filter`, then the default.
///
/// Calling this twice is harmless: the second installation is ignored.
pub fn init_logging_with(filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| filter.and_then(|f| EnvFilter::try_new(f).ok()))
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
