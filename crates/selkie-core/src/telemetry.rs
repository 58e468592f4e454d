//! Logging setup
//!
//! TigerStyle: Explicit telemetry configuration, installed once by the host.
//!
//! The runtime itself only emits `tracing` events. Hosts call
//! [`init_telemetry`] to install a subscriber that prints them.

use crate::error::{Error, Result};

/// Default service name attached to the startup event
const SERVICE_NAME_DEFAULT: &str = "selkie";

/// Default log filter
const LOG_LEVEL_DEFAULT: &str = "info";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for the startup event
    pub service_name: String,
    /// Whether to output events to stdout
    pub stdout_enabled: bool,
    /// Log level filter (`EnvFilter` syntax)
    pub log_level: String,
    /// Whether to emit span close events (useful for timing calls)
    pub span_events_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME_DEFAULT.to_string(),
            stdout_enabled: true,
            log_level: LOG_LEVEL_DEFAULT.to_string(),
            span_events_enabled: false,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Disable stdout output
    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Emit an event when each span closes
    pub fn with_span_events(mut self) -> Self {
        self.span_events_enabled = true;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `SELKIE_SERVICE_NAME`: Service name (default: "selkie")
    /// - `RUST_LOG`: Log level filter (default: "info")
    pub fn from_env() -> Self {
        let service_name = std::env::var("SELKIE_SERVICE_NAME")
            .unwrap_or_else(|_| SERVICE_NAME_DEFAULT.to_string());

        let log_level =
            std::env::var("RUST_LOG").unwrap_or_else(|_| LOG_LEVEL_DEFAULT.to_string());

        Self {
            service_name,
            log_level,
            ..Default::default()
        }
    }
}

/// Install the global tracing subscriber
///
/// Fails if a global subscriber is already installed.
///
/// # Example
///
/// ```rust,ignore
/// use selkie_core::telemetry::{init_telemetry, TelemetryConfig};
///
/// let _guard = init_telemetry(TelemetryConfig::from_env())?;
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_new(&config.log_level).map_err(|e| {
        Error::invalid_configuration("telemetry.log_level", e.to_string())
    })?;

    let fmt_layer = if config.stdout_enabled {
        let span_events = if config.span_events_enabled {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        Some(tracing_subscriber::fmt::layer().with_span_events(span_events))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::internal(format!("failed to initialize tracing subscriber: {}", e)))?;

    tracing::info!(service = %config.service_name, "Telemetry initialized");

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

/// Returned by [`init_telemetry`]; logs when the host shuts down
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Telemetry shutting down");
    }
}
