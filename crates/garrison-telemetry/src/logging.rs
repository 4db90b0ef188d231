//! Structured logging to stdout, mirrored to a persistent log file.
//!
//! The file layer exists so that a user who only sees a short on-screen
//! message can still hand over the full diagnostic trail.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use crate::{LogFormat, TelemetryConfig, TelemetryError};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the logging subsystem.
///
/// Sets up tracing-subscriber with either JSON or pretty format on the console,
/// respecting the configured log level, plus a JSON file layer when
/// `log_file` is set.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let file = match &config.log_file {
        Some(path) => Some(open_log_file(path)?),
        None => None,
    };

    let console = if config.console_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    match config.log_format {
        LogFormat::Json => init_json_logging(&config.log_level, console, file),
        LogFormat::Pretty => init_pretty_logging(&config.log_level, console, file),
    }
}

/// Open (append) the persistent log file, creating parent directories.
pub fn open_log_file(path: &Path) -> Result<File, TelemetryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TelemetryError::LogFile {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| TelemetryError::LogFile {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Build the env filter from RUST_LOG, or the configured level.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize JSON logging for packaged builds.
fn init_json_logging(
    level: &str,
    console: BoxMakeWriter,
    file: Option<File>,
) -> Result<(), TelemetryError> {
    let json_layer = fmt::layer()
        .json()
        .with_writer(console)
        .with_target(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_file(false)
        .with_line_number(false)
        .flatten_event(true)
        .with_filter(build_filter(level));

    let file_layer = file.map(|f| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .flatten_event(true)
            .with_writer(Mutex::new(f))
            .with_filter(build_filter(level))
    });

    tracing_subscriber::registry()
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

/// Initialize pretty logging for development.
fn init_pretty_logging(
    level: &str,
    console: BoxMakeWriter,
    file: Option<File>,
) -> Result<(), TelemetryError> {
    let pretty_layer = fmt::layer()
        .pretty()
        .with_writer(console)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(build_filter(level));

    let file_layer = file.map(|f| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .flatten_event(true)
            .with_writer(Mutex::new(f))
            .with_filter(build_filter(level))
    });

    tracing_subscriber::registry()
        .with(pretty_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

/// Standard log event names.
pub mod events {
    /// Launcher is starting up.
    pub const STARTUP: &str = "startup";

    /// Launcher is shutting down.
    pub const SHUTDOWN: &str = "shutdown";

    /// Role has been resolved.
    pub const ROLE_RESOLVED: &str = "role_resolved";

    /// Asset server is listening on a port.
    pub const LISTENING: &str = "listening";

    /// Backend child process has been spawned.
    pub const BACKEND_SPAWNED: &str = "backend_spawned";

    /// Backend launch resolved (readiness signal or fallback timer).
    pub const BACKEND_READY: &str = "backend_ready";

    /// Backend child process exited.
    pub const BACKEND_EXITED: &str = "backend_exited";

    /// Health check attempt failed and will be retried.
    pub const HEALTH_RETRY: &str = "health_retry";

    /// Health check gave up.
    pub const HEALTH_EXHAUSTED: &str = "health_exhausted";

    /// Update check performed.
    pub const UPDATE_CHECK: &str = "update_check";

    /// Update check, download or install failed.
    pub const UPDATE_ERROR: &str = "update_error";

    /// Bootstrap failed and the process is exiting.
    pub const FATAL: &str = "fatal";
}

/// Helper macros for structured logging with standard fields.
///
/// These wrap the tracing macros to ensure consistent field naming.
#[macro_export]
macro_rules! log_startup {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::STARTUP,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_shutdown {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::SHUTDOWN,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_role_resolved {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::ROLE_RESOLVED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_listening {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::LISTENING,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_backend_spawned {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::BACKEND_SPAWNED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_backend_ready {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::BACKEND_READY,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_backend_exited {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::BACKEND_EXITED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_health_retry {
    ($($field:tt)*) => {
        tracing::debug!(
            event = $crate::logging::events::HEALTH_RETRY,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_health_exhausted {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::HEALTH_EXHAUSTED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_update_check {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::UPDATE_CHECK,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_update_error {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::UPDATE_ERROR,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_fatal {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::FATAL,
            $($field)*
        )
    };
}
