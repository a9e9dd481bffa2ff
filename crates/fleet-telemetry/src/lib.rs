//! # Fleet Telemetry
//!
//! Logging bootstrap for the fleet gateway service.
//!
//! Structured logs go through `tracing`; output is either a pretty console
//! format for development or JSON for container deployments, selected by
//! configuration.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fleet_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_telemetry(&config).expect("failed to init telemetry");
//! }
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

mod config;

pub use config::TelemetryConfig;

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("failed to initialize log filter: {0}")]
    FilterInit(String),

    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` / `FLEET_LOG_LEVEL` override the configured level filter.
/// Calling this twice returns an error from the global subscriber registry;
/// tests that need logging should use `tracing_subscriber::fmt::try_init`
/// locally instead.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::FilterInit(e.to_string()))?;

    if config.json_logs {
        // JSON output for containers/production
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_file(config.log_locations)
            .with_line_number(config.log_locations);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
            .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;
    } else {
        // Pretty output for development
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(config.log_locations)
            .with_line_number(config.log_locations)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;
    }

    tracing::info!(
        service = %config.service_name,
        json = config.json_logs,
        "Telemetry initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_parses_configured_level() {
        let config = TelemetryConfig {
            log_level: "fleet_gateway=debug,info".to_string(),
            ..TelemetryConfig::default()
        };
        assert!(EnvFilter::try_new(&config.log_level).is_ok());
    }
}
