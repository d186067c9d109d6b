//! Tracing subscriber setup.

use chronicle_core::config::LogFormat;
use tracing_subscriber::EnvFilter;

use crate::error::RuntimeError;

/// Installs the global subscriber. `RUST_LOG` overrides the `info` default.
///
/// # Errors
///
/// Returns `RuntimeError::Telemetry` if a global subscriber is already set.
pub fn init_tracing(format: LogFormat) -> Result<(), RuntimeError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    installed.map_err(|err| RuntimeError::Telemetry(err.to_string()))
}
