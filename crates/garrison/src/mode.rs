//! Role resolution: Host (owns the backend) or Satellite (remote backend).
//!
//! The role is decided from an explicit override first, then from the
//! presence of the persisted endpoint-configuration file. Resolution never
//! fails: any read problem falls back to Host, which is the safe default for
//! a single-machine install.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::DEFAULT_BACKEND_PORT;
use crate::endpoint::LOOPBACK;

/// Environment variable carrying an explicit role override.
pub const ROLE_ENV: &str = "GARRISON_ROLE";

/// Environment variable overriding the endpoint-configuration file path.
pub const ENDPOINT_FILE_ENV: &str = "GARRISON_ENDPOINT_FILE";

/// File name of the endpoint configuration inside the application data dir.
pub const ENDPOINT_FILE_NAME: &str = "endpoint.conf";

/// Which part of the topology this instance plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Spawns and owns the backend locally.
    Host,
    /// Talks to a backend elsewhere on the network.
    Satellite,
}

impl Role {
    /// Parse from string. Accepts the update channel names as aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "host" | "server" => Some(Self::Host),
            "satellite" | "client" => Some(Self::Satellite),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Satellite => "satellite",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted address of the remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointConfig {
    pub ip: String,
    pub backend_port: u16,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            ip: LOOPBACK.to_string(),
            backend_port: DEFAULT_BACKEND_PORT,
        }
    }
}

impl EndpointConfig {
    /// Parse `KEY=value` lines.
    ///
    /// Recognized keys are `IP` and `BackendPort`. Unknown keys, blank lines
    /// and `#` comments are skipped; a missing, zero or malformed port keeps
    /// the canonical default.
    pub fn parse(contents: &str) -> Self {
        let mut config = Self::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            if key.eq_ignore_ascii_case("IP") {
                if !value.is_empty() {
                    config.ip = value.to_string();
                }
            } else if key.eq_ignore_ascii_case("BackendPort") {
                match value.parse::<u16>() {
                    Ok(port) if port != 0 => config.backend_port = port,
                    _ => {
                        tracing::debug!(value, "ignoring malformed BackendPort");
                    }
                }
            }
        }

        config
    }
}

/// Result of role resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub role: Role,
    /// Present only for Satellite.
    pub endpoint: Option<EndpointConfig>,
}

impl Resolution {
    fn host() -> Self {
        Self {
            role: Role::Host,
            endpoint: None,
        }
    }

    fn satellite(endpoint: EndpointConfig) -> Self {
        Self {
            role: Role::Satellite,
            endpoint: Some(endpoint),
        }
    }
}

/// Pure resolution from an override and the file contents (`None` = no file).
pub fn resolve_from(override_role: Option<Role>, contents: Option<&str>) -> Resolution {
    match (override_role, contents) {
        (Some(Role::Host), _) => Resolution::host(),
        (Some(Role::Satellite), contents) => {
            Resolution::satellite(contents.map(EndpointConfig::parse).unwrap_or_default())
        }
        (None, Some(contents)) => Resolution::satellite(EndpointConfig::parse(contents)),
        (None, None) => Resolution::host(),
    }
}

/// Resolve the role, reading the endpoint file at `path` when needed.
pub fn resolve(override_role: Option<Role>, path: &Path) -> Resolution {
    if override_role == Some(Role::Host) {
        return Resolution::host();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => resolve_from(override_role, Some(&contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => resolve_from(override_role, None),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "endpoint file unreadable, using defaults"
            );
            resolve_from(override_role, None)
        }
    }
}

/// Default location of the endpoint file:
/// `<platform data dir>/garrison/endpoint.conf`.
pub fn default_endpoint_file() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("garrison").join(ENDPOINT_FILE_NAME))
}
