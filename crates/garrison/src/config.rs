//! Bootstrap configuration and the per-session context.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::health::HealthPolicy;
use crate::mode::{EndpointConfig, Resolution, Role};
use crate::supervisor::LaunchSpec;

/// Fixed port of the local asset server.
pub const DEFAULT_ASSET_PORT: u16 = 4173;

/// Backend port used when nothing else is configured.
pub const DEFAULT_BACKEND_PORT: u16 = 3001;

/// How long to wait for a readiness line before assuming the backend is up.
pub const DEFAULT_READINESS_FALLBACK: Duration = Duration::from_secs(2);

/// Period of the background update check.
pub const UPDATE_CHECK_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// Environment passed to the backend in addition to the inherited one.
pub const BACKEND_ENV_APP: (&str, &str) = ("APP_ENV", "production");

/// Static configuration for one bootstrap.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Skip the packaged asset server; a dev server provides the UI.
    pub dev_mode: bool,
    /// Directory served by the asset server.
    pub assets_dir: PathBuf,
    /// Interface the asset server binds.
    pub asset_bind: IpAddr,
    pub asset_port: u16,
    /// Backend executable spawned in Host role.
    pub backend_executable: PathBuf,
    pub backend_args: Vec<String>,
    /// Port the locally spawned backend listens on.
    pub backend_port: u16,
    pub health: HealthPolicy,
    pub readiness_fallback: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        let resources = resource_dir();
        Self {
            dev_mode: false,
            assets_dir: resources.join("dist"),
            asset_bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            asset_port: DEFAULT_ASSET_PORT,
            backend_executable: resources.join(default_backend_name()),
            backend_args: Vec::new(),
            backend_port: DEFAULT_BACKEND_PORT,
            health: HealthPolicy::default(),
            readiness_fallback: DEFAULT_READINESS_FALLBACK,
        }
    }
}

impl BootstrapConfig {
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    pub fn with_assets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.assets_dir = dir.into();
        self
    }

    pub fn with_asset_bind(mut self, addr: IpAddr) -> Self {
        self.asset_bind = addr;
        self
    }

    pub fn with_asset_port(mut self, port: u16) -> Self {
        self.asset_port = port;
        self
    }

    pub fn with_backend_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.backend_executable = path.into();
        self
    }

    pub fn with_backend_args(mut self, args: Vec<String>) -> Self {
        self.backend_args = args;
        self
    }

    pub fn with_backend_port(mut self, port: u16) -> Self {
        self.backend_port = port;
        self
    }

    pub fn with_health(mut self, health: HealthPolicy) -> Self {
        self.health = health;
        self
    }

    pub fn with_readiness_fallback(mut self, fallback: Duration) -> Self {
        self.readiness_fallback = fallback;
        self
    }

    /// Socket address the asset server binds.
    pub fn asset_addr(&self) -> SocketAddr {
        SocketAddr::new(self.asset_bind, self.asset_port)
    }
}

/// Directory holding packaged resources: the one containing the executable.
fn resource_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_backend_name() -> &'static str {
    if cfg!(windows) {
        "garrison-backend.exe"
    } else {
        "garrison-backend"
    }
}

/// Everything decided before the bootstrap sequence starts.
#[derive(Debug, Clone)]
pub struct BootstrapContext {
    pub role: Role,
    /// Satellite only.
    pub endpoint_config: Option<EndpointConfig>,
    pub config: BootstrapConfig,
}

impl BootstrapContext {
    pub fn new(resolution: Resolution, config: BootstrapConfig) -> Self {
        Self {
            role: resolution.role,
            endpoint_config: resolution.endpoint,
            config,
        }
    }

    /// Backend endpoint probed after startup.
    ///
    /// Host: the loopback address at the configured backend port.
    /// Satellite: the persisted address.
    pub fn backend_endpoint(&self) -> Endpoint {
        match self.role {
            Role::Host => Endpoint::loopback(self.config.backend_port),
            Role::Satellite => {
                let remote = self.endpoint_config.clone().unwrap_or_default();
                Endpoint::new(remote.ip, remote.backend_port)
            }
        }
    }

    /// Launch description of the local backend.
    pub fn backend_launch_spec(&self) -> LaunchSpec {
        let port = self.config.backend_port.to_string();
        LaunchSpec::new(&self.config.backend_executable)
            .with_args(self.config.backend_args.clone())
            .with_env(BACKEND_ENV_APP.0, BACKEND_ENV_APP.1)
            .with_env("HOST", crate::endpoint::LOOPBACK)
            .with_env("PORT", port)
            .with_readiness_fallback(self.config.readiness_fallback)
    }
}
