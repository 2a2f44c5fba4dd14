//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured level. Installing twice is not an
//! error: the second call leaves the existing subscriber in place, which is
//! what tests and embedding applications expect.

use hist_core::{HistError, HistResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Build the filter: `RUST_LOG` if set and valid, otherwise `level`.
pub fn env_filter(level: &str) -> HistResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| HistError::Configuration(format!("Invalid log filter '{level}': {e}")))
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_tracing(level: &str, json: bool) -> HistResult<bool> {
    let filter = env_filter(level)?;
    let layer = if json {
        fmt::layer().json().with_filter(filter).boxed()
    } else {
        fmt::layer().with_target(true).with_filter(filter).boxed()
    };
    Ok(tracing_subscriber::registry().with(layer).try_init().is_ok())
}
