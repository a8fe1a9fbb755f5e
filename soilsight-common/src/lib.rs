//! SoilSight Common Library
//!
//! This crate provides shared types and utilities for SoilSight field bridges:
//!
//! - [`telemetry`] - Reading data model (`ChannelReading`, `ReadingBatch`, timestamped payloads)
//! - [`serialization`] - JSON payload encoding and decoding
//! - [`config`] - Configuration loading (JSON5 format) and logging settings
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod serialization;
pub mod telemetry;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, parse_config};
pub use error::{Error, Result};
pub use serialization::{decode, encode};
pub use telemetry::{
    ChannelReading, MANDATORY_CHANNELS, Measurement, NITROGEN, PHOSPHORUS, POTASSIUM,
    ReadingBatch, TimestampedPayload, ValidationError, current_timestamp_millis, is_mandatory,
};

/// Initialize tracing with the given configuration.
///
/// Call once at process start, before any component is constructed. The
/// `RUST_LOG` environment variable takes precedence over `config.level`.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// # Example
///
/// ```ignore
/// use soilsight_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
