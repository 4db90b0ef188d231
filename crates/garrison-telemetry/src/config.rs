//! Telemetry configuration.

use std::path::PathBuf;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Structured JSON output (packaged builds).
    #[default]
    Json,
    /// Human-readable pretty output (development).
    Pretty,
}

impl LogFormat {
    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded on startup (default: "garrison").
    pub service_name: String,

    /// Log level filter (default: "info").
    pub log_level: String,

    /// Console log format.
    pub log_format: LogFormat,

    /// Write console logs to stderr instead of stdout, keeping stdout
    /// free for command output.
    pub console_stderr: bool,

    /// Persistent log file. Always JSON, never colored.
    /// If not set, logs only go to stdout.
    pub log_file: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "garrison".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            console_stderr: false,
            log_file: None,
        }
    }
}

impl TelemetryConfig {
    /// Create a new telemetry config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service name.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the log level.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the log format.
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Send console logs to stderr.
    pub fn with_console_stderr(mut self, enabled: bool) -> Self {
        self.console_stderr = enabled;
        self
    }

    /// Set the persistent log file.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Default location of the persistent log file:
/// `<platform data dir>/garrison/logs/garrison.log`.
pub fn default_log_file() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("garrison").join("logs").join("garrison.log"))
}
