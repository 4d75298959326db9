//! Tracing subscriber initialization.
//!
//! Components only emit `tracing` events and spans. Installing the global
//! subscriber happens once, here, at process start.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use tracing_subscriber::util::TryInitError;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Environment (production, staging, development)
    pub environment: String,
    pub log_format: LogFormat,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("CRUDSTORE_SERVICE_NAME")
                .unwrap_or_else(|_| "crudstore".to_string()),
            environment: std::env::var("CRUDSTORE_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            log_format: std::env::var("CRUDSTORE_LOG_FORMAT")
                .map(|s| {
                    if s.eq_ignore_ascii_case("pretty") {
                        LogFormat::Pretty
                    } else {
                        LogFormat::Json
                    }
                })
                .unwrap_or_default(),
            default_filter: "crudstore_service=info,crudstore_storage=info,warn".to_string(),
        }
    }
}

impl TelemetryConfig {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. A second call returns an error and leaves the
/// first subscriber in place.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TryInitError> {
    let (json, pretty) = match config.log_format {
        LogFormat::Json => (Some(fmt::layer().json()), None),
        LogFormat::Pretty => (None, Some(fmt::layer().pretty())),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(json)
        .with(pretty)
        .try_init()?;

    tracing::info!(
        service_name = config.service_name,
        environment = config.environment,
        log_format = ?config.log_format,
        "Telemetry initialized"
    );

    Ok(())
}
