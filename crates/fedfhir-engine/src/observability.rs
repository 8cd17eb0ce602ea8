//! Tracing setup. The filter sits behind a reload layer so `logging.level`
//! can change while the process runs.
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Installs the global subscriber. `RUST_LOG` wins over `logging.level`.
/// Calling this again after a subscriber is set has no effect.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level)),
        Err(_) => EnvFilter::new(&logging.level),
    };

    let (filter_layer, handle) = reload::Layer::new(filter);
    if FILTER_HANDLE.set(handle).is_err() {
        return;
    }

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Swaps the active filter. Returns false before [`init_tracing`] ran.
pub fn apply_logging_level(level: &str) -> bool {
    FILTER_HANDLE
        .get()
        .is_some_and(|handle| handle.modify(|filter| *filter = EnvFilter::new(level)).is_ok())
}
