//! Process-wide `tracing` setup for binaries and tests embedding the cache.
//!
//! The library itself only emits events (per-message traffic at `debug`,
//! subscribe/unsubscribe at `info`, swallowed shared-store failures and
//! undecodable payloads at `warn`); installing a subscriber is left to the
//! host process, which can use the helpers here.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Installs the `fmt` subscriber at `info`. See [`init_tracing_with_level`].
pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Installs a `fmt` subscriber behind a reloadable [`EnvFilter`].
///
/// `RUST_LOG`, when set and valid, takes precedence over `level`. Only the
/// first call in a process installs anything; later calls are no-ops.
pub fn init_tracing_with_level(level: &str) {
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer())
        .try_init();
}

/// Installs the subscriber at the level from [`LoggingConfig`].
pub fn init_tracing_from_config(logging: &LoggingConfig) {
    init_tracing_with_level(&logging.level);
}

/// Swaps the active filter for `level`, e.g. after a config reload.
///
/// Returns `false` when tracing was not initialized through this module.
pub fn apply_logging_level(level: &str) -> bool {
    match LOG_RELOAD_HANDLE.get() {
        Some(handle) => handle
            .modify(|f| {
                *f = EnvFilter::new(level);
            })
            .is_ok(),
        None => false,
    }
}
