//! Logging infrastructure for the Garrison launcher.
//!
//! This crate provides:
//! - Structured JSON (or pretty) logging to stdout
//! - A persistent JSON log file for post-mortem diagnosis
//! - Standard event names and logging macros
//!
//! # Usage
//!
//! ```ignore
//! use garrison_telemetry::{Telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::new()
//!     .with_log_level("info")
//!     .with_log_file("/var/log/garrison.log");
//!
//! let telemetry = Telemetry::init(config)?;
//! ```

pub mod config;
pub mod logging;

pub use config::{default_log_file, LogFormat, TelemetryConfig};
pub use logging::events;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Telemetry errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize logging.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Failed to open the persistent log file.
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Telemetry handle.
///
/// Keeps the configuration around so fatal-error reporting can point the
/// user at the log file.
pub struct Telemetry {
    config: TelemetryConfig,
}

impl Telemetry {
    /// Initialize telemetry with the given configuration.
    pub fn init(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        logging::init_logging(&config)?;

        log_startup!(
            service = %config.service_name,
            log_file = ?config.log_file,
            "logging initialized"
        );

        Ok(Self { config })
    }

    /// Build a handle without installing a subscriber.
    ///
    /// Use this when logging is already initialized (e.g., in tests).
    pub fn without_logging(config: TelemetryConfig) -> Self {
        Self { config }
    }

    /// Get the telemetry configuration.
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Location of the persistent log file, if one is configured.
    pub fn log_file(&self) -> Option<&Path> {
        self.config.log_file.as_deref()
    }
}
