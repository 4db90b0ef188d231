//! Background update checks, scoped to a role-derived channel.
//!
//! Update checks are best-effort and never block bootstrap. Network
//! unavailability is expected on a desktop and is only logged; every other
//! failure is also surfaced through a [`Notifier`].

use std::future::Future;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use garrison_telemetry::{log_update_check, log_update_error};

use crate::mode::Role;

/// Named partition of the update catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Server,
    Client,
}

impl Channel {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Host => Channel::Server,
            Role::Satellite => Channel::Client,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Server => "server",
            Channel::Client => "client",
        }
    }
}

/// Observable state of the update controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Checking,
    NotAvailable,
    Available(String),
    Downloading { received: u64, total: Option<u64> },
    Downloaded(String),
    Error(String),
}

/// Release metadata published by the update service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub version: String,
    pub url: String,
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Result of one update check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateInfo {
    pub current_version: String,
    pub latest: ReleaseInfo,
    pub available: bool,
}

/// Errors from update checks, downloads and installs.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("update request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("update service returned status {0}")]
    Status(u16),

    #[error("invalid update metadata: {0}")]
    Metadata(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },

    #[error("update I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot {action} while update state is {state}")]
    InvalidState { action: &'static str, state: String },

    #[error("failed to launch installer {}: {source}", path.display())]
    Install {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl UpdateError {
    /// Connectivity failures (no network, DNS, timeouts).
    pub fn is_offline(&self) -> bool {
        match self {
            UpdateError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

/// Download progress callback: `(received, total)`.
pub type Progress<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Remote catalog of update packages.
pub trait UpdateService: Send + Sync {
    /// Latest release on a channel.
    fn latest(
        &self,
        channel: Channel,
    ) -> impl Future<Output = Result<ReleaseInfo, UpdateError>> + Send;

    /// Download and verify a release into `dest_dir`, returning the package path.
    fn download(
        &self,
        release: &ReleaseInfo,
        dest_dir: &Path,
        progress: Progress<'_>,
    ) -> impl Future<Output = Result<PathBuf, UpdateError>> + Send;

    /// Hand a downloaded package over to the platform installer.
    fn install(&self, package: &Path) -> Result<(), UpdateError>;
}

/// Non-blocking user notification.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Prints notifications to stderr.
#[derive(Debug, Default)]
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, title: &str, message: &str) {
        let _ = writeln!(std::io::stderr(), "{title}: {message}");
    }
}

/// Default bound on a metadata request.
const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Reference client: `GET {base}/{channel}/latest.json`.
#[derive(Debug, Clone)]
pub struct HttpUpdateService {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpUpdateService {
    pub fn new(base_url: impl Into<String>) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("garrison/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            request_timeout: METADATA_TIMEOUT,
        })
    }

    /// Bound on a metadata request, connect included.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn manifest_url(&self, channel: Channel) -> String {
        format!(
            "{}/{}/latest.json",
            self.base_url.trim_end_matches('/'),
            channel.as_str()
        )
    }
}

/// File name of a downloaded package: last URL segment, else derived from the version.
fn package_file_name(release: &ReleaseInfo) -> String {
    release
        .url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
        .unwrap_or_else(|| format!("garrison-{}", release.version))
}

impl UpdateService for HttpUpdateService {
    async fn latest(&self, channel: Channel) -> Result<ReleaseInfo, UpdateError> {
        let url = self.manifest_url(channel);
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpdateError::Status(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        let release: ReleaseInfo =
            serde_json::from_slice(&body).map_err(|e| UpdateError::Metadata(e.to_string()))?;
        if release.version.trim().is_empty() {
            return Err(UpdateError::Metadata("empty version".to_string()));
        }
        Ok(release)
    }

    async fn download(
        &self,
        release: &ReleaseInfo,
        dest_dir: &Path,
        progress: Progress<'_>,
    ) -> Result<PathBuf, UpdateError> {
        let file_name = package_file_name(release);
        let temp_path = dest_dir.join(format!("{file_name}.{}.tmp", Uuid::new_v4()));

        tracing::info!(
            url = %release.url,
            temp_path = %temp_path.display(),
            "downloading update"
        );

        let response = self.client.get(&release.url).send().await?;
        if !response.status().is_success() {
            return Err(UpdateError::Status(response.status().as_u16()));
        }

        let total = response.content_length();
        let file = tokio::fs::File::create(&temp_path).await?;

        let (actual, received) =
            match write_hashed(file, response.bytes_stream(), total, progress).await {
                Ok(written) => written,
                Err(e) => {
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    return Err(e);
                }
            };

        if !actual.eq_ignore_ascii_case(release.sha256.trim()) {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(UpdateError::Checksum {
                expected: release.sha256.clone(),
                actual,
            });
        }

        let final_path = dest_dir.join(&file_name);
        tokio::fs::rename(&temp_path, &final_path).await?;

        tracing::info!(
            path = %final_path.display(),
            size_bytes = received,
            sha256 = %actual,
            "update downloaded and verified"
        );

        Ok(final_path)
    }

    fn install(&self, package: &Path) -> Result<(), UpdateError> {
        let install_err = |source| UpdateError::Install {
            path: package.to_path_buf(),
            source,
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(package, std::fs::Permissions::from_mode(0o755))
                .map_err(install_err)?;
        }

        std::process::Command::new(package)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(install_err)?;

        tracing::info!(package = %package.display(), "installer launched");
        Ok(())
    }
}

/// Stream `chunks` into `file` while hashing. Returns the hex digest and
/// the byte count.
async fn write_hashed<W, B, E>(
    mut file: W,
    chunks: impl futures_util::Stream<Item = Result<B, E>>,
    total: Option<u64>,
    progress: Progress<'_>,
) -> Result<(String, u64), UpdateError>
where
    W: tokio::io::AsyncWrite + Unpin,
    B: AsRef<[u8]>,
    UpdateError: From<E>,
{
    let mut hasher = Sha256::new();
    let mut received = 0u64;
    progress(received, total);

    let mut chunks = std::pin::pin!(chunks);
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        let chunk = chunk.as_ref();
        hasher.update(chunk);
        file.write_all(chunk).await?;
        received += chunk.len() as u64;
        progress(received, total);
    }

    file.flush().await?;
    Ok((hex::encode(hasher.finalize()), received))
}

/// `latest` is newer than `current`. Falls back to inequality when either
/// side is not semver.
pub fn is_newer(latest: &str, current: &str) -> bool {
    let latest = latest.trim().trim_start_matches('v');
    let current = current.trim().trim_start_matches('v');
    match (semver::Version::parse(latest), semver::Version::parse(current)) {
        (Ok(latest), Ok(current)) => latest > current,
        _ => latest != current,
    }
}

/// Drives update checks, downloads and installs for one channel.
pub struct UpdateController<S> {
    service: S,
    current_version: String,
    channel: Mutex<Channel>,
    pending: Mutex<Option<ReleaseInfo>>,
    announced: Mutex<Option<String>>,
    package: Mutex<Option<PathBuf>>,
    state_tx: watch::Sender<UpdateState>,
    download_dir: PathBuf,
    notifier: Arc<dyn Notifier>,
}

impl<S: UpdateService> UpdateController<S> {
    pub fn new(
        service: S,
        current_version: impl Into<String>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state_tx, _) = watch::channel(UpdateState::Idle);
        Self {
            service,
            current_version: current_version.into(),
            channel: Mutex::new(Channel::Server),
            pending: Mutex::new(None),
            announced: Mutex::new(None),
            package: Mutex::new(None),
            state_tx,
            download_dir: std::env::temp_dir().join("garrison-updates"),
            notifier,
        }
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// Select the channel used by subsequent checks.
    pub fn configure(&self, channel: Channel) {
        *self.channel.lock() = channel;
    }

    pub fn channel(&self) -> Channel {
        *self.channel.lock()
    }

    pub fn state(&self) -> UpdateState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UpdateState> {
        self.state_tx.subscribe()
    }

    /// Ask the service for the latest release on the configured channel.
    ///
    /// While a package is downloading or downloaded the check only reports;
    /// state and the pending release stay as they are until install.
    pub async fn check_now(&self) -> Result<UpdateInfo, UpdateError> {
        let channel = self.channel();
        let holding = matches!(
            self.state(),
            UpdateState::Downloading { .. } | UpdateState::Downloaded(_)
        );
        if !holding {
            self.state_tx.send_replace(UpdateState::Checking);
        }

        let latest = match self.service.latest(channel).await {
            Ok(release) => release,
            Err(e) if holding => {
                tracing::debug!(error = %e, "update check failed while a package is pending");
                return Err(e);
            }
            Err(e) => return Err(self.fail("check", e)),
        };

        let available = is_newer(&latest.version, &self.current_version);
        log_update_check!(
            channel = channel.as_str(),
            current = %self.current_version,
            latest = %latest.version,
            available,
            "update check complete"
        );

        if !holding {
            if available {
                *self.pending.lock() = Some(latest.clone());
                self.state_tx
                    .send_replace(UpdateState::Available(latest.version.clone()));
                self.announce(&latest.version);
            } else {
                *self.pending.lock() = None;
                self.state_tx.send_replace(UpdateState::NotAvailable);
            }
        }

        Ok(UpdateInfo {
            current_version: self.current_version.clone(),
            latest,
            available,
        })
    }

    /// Download the pending release. Only valid after an update was found.
    pub async fn download(&self) -> Result<PathBuf, UpdateError> {
        let release = match (self.state(), self.pending.lock().clone()) {
            (UpdateState::Available(_), Some(release)) => release,
            (state, _) => return Err(invalid_state("download", &state)),
        };

        self.state_tx.send_replace(UpdateState::Downloading {
            received: 0,
            total: None,
        });

        if let Err(e) = tokio::fs::create_dir_all(&self.download_dir).await {
            return Err(self.fail("download", e.into()));
        }

        let progress = |received: u64, total: Option<u64>| {
            self.state_tx
                .send_replace(UpdateState::Downloading { received, total });
        };

        match self
            .service
            .download(&release, &self.download_dir, &progress)
            .await
        {
            Ok(path) => {
                *self.package.lock() = Some(path.clone());
                self.state_tx
                    .send_replace(UpdateState::Downloaded(release.version));
                Ok(path)
            }
            Err(e) => Err(self.fail("download", e)),
        }
    }

    /// Launch the installer for the downloaded package. The caller is
    /// expected to exit afterwards so the installer can replace it.
    pub fn install(&self) -> Result<(), UpdateError> {
        let package = match (self.state(), self.package.lock().clone()) {
            (UpdateState::Downloaded(_), Some(package)) => package,
            (state, _) => return Err(invalid_state("install", &state)),
        };

        self.service
            .install(&package)
            .map_err(|e| self.fail("install", e))
    }

    /// Tell the user about a new version, once per version.
    fn announce(&self, version: &str) {
        {
            let mut announced = self.announced.lock();
            if announced.as_deref() == Some(version) {
                return;
            }
            *announced = Some(version.to_string());
        }
        self.notifier.notify(
            "Update available",
            &format!(
                "version {version} is available (current {}); run `garrison check-update --download --install` to update",
                self.current_version
            ),
        );
    }

    /// Record a failure; notify unless the network is simply unavailable.
    fn fail(&self, action: &'static str, error: UpdateError) -> UpdateError {
        let message = error.to_string();
        self.state_tx.send_replace(UpdateState::Error(message.clone()));

        if error.is_offline() {
            tracing::debug!(action, error = %message, "update service unreachable");
        } else {
            log_update_error!(action, error = %message, "update failed");
            self.notifier.notify("Update failed", &message);
        }
        error
    }
}

impl<S: UpdateService + 'static> UpdateController<S> {
    /// Check now and then every `interval` until `shutdown` flips.
    pub fn spawn_periodic(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        // Failures are already logged and notified
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = self.check_now() => {}
                        }
                    }
                }
            }

            tracing::debug!("update loop stopped");
        })
    }
}

fn invalid_state(action: &'static str, state: &UpdateState) -> UpdateError {
    UpdateError::InvalidState {
        action,
        state: format!("{state:?}"),
    }
}
