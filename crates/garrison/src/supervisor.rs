//! Process supervisor for the locally owned backend.
//!
//! Launching resolves as soon as the backend prints a readiness line or a
//! fallback timer fires, whichever comes first. Readiness matching is only a
//! hint; the health check that follows is authoritative. After launch, the
//! supervisor keeps forwarding the child's output to the log and publishes
//! its exit through a watch channel.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use garrison_telemetry::{log_backend_exited, log_backend_ready, log_backend_spawned};

use crate::config::DEFAULT_READINESS_FALLBACK;

/// Substrings (case-insensitive) that mark a backend as ready.
pub const READINESS_MARKERS: &[&str] = &["listening", "started"];

/// Lifecycle of the supervised child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Starting,
    Running,
    /// Exit code, `None` when terminated by a signal.
    Exited(Option<i32>),
    Failed(String),
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Exited(_) | ProcessState::Failed(_))
    }
}

/// How the launch race was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchReadiness {
    /// The backend printed a readiness line.
    Signal,
    /// The fallback timer fired first.
    Fallback,
}

/// Errors from launching the backend.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("backend executable not found at {}", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("failed to start backend {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SupervisorError {
    pub fn path(&self) -> &Path {
        match self {
            SupervisorError::ExecutableNotFound(path) => path,
            SupervisorError::Spawn { path, .. } => path,
        }
    }
}

/// What to launch and how long to wait for it.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub readiness_fallback: Duration,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            env: Vec::new(),
            readiness_fallback: DEFAULT_READINESS_FALLBACK,
            working_dir: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_readiness_fallback(mut self, fallback: Duration) -> Self {
        self.readiness_fallback = fallback;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Whether an output line announces readiness.
pub fn is_readiness_line(line: &str) -> bool {
    let line = line.to_lowercase();
    READINESS_MARKERS.iter().any(|marker| line.contains(marker))
}

/// Launch the backend and wait for readiness or the fallback timer.
pub async fn launch(spec: LaunchSpec) -> Result<ProcessHandle, SupervisorError> {
    let (state_tx, state_rx) = watch::channel(ProcessState::NotStarted);

    if !tokio::fs::try_exists(&spec.executable).await.unwrap_or(false) {
        return Err(SupervisorError::ExecutableNotFound(spec.executable));
    }

    state_tx.send_replace(ProcessState::Starting);

    let mut command = Command::new(&spec.executable);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|e| SupervisorError::Spawn {
        path: spec.executable.clone(),
        source: e,
    })?;

    let pid = child.id();
    state_tx.send_replace(ProcessState::Running);
    log_backend_spawned!(
        pid = ?pid,
        executable = %spec.executable.display(),
        "backend process spawned"
    );

    let (ready_tx, mut ready_rx) = oneshot::channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_stdout(stdout, Some(ready_tx)));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_stderr(stderr));
    }

    let (kill_tx, kill_rx) = oneshot::channel();
    let exit_task = tokio::spawn(watch_exit(child, kill_rx, state_tx));

    let readiness = tokio::select! {
        Ok(()) = &mut ready_rx => LaunchReadiness::Signal,
        _ = tokio::time::sleep(spec.readiness_fallback) => LaunchReadiness::Fallback,
    };
    log_backend_ready!(pid = ?pid, readiness = ?readiness, "backend launch resolved");

    Ok(ProcessHandle {
        pid,
        readiness,
        state_rx,
        kill_tx: Some(kill_tx),
        exit_task: Some(exit_task),
    })
}

/// Log stdout lines; signal readiness on the first matching one.
async fn forward_stdout<R>(stdout: R, mut ready_tx: Option<oneshot::Sender<()>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: "garrison::backend", "{line}");
        if ready_tx.is_some() && is_readiness_line(&line) {
            if let Some(tx) = ready_tx.take() {
                let _ = tx.send(());
            }
        }
    }
}

async fn forward_stderr<R>(stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::warn!(target: "garrison::backend", "{line}");
    }
}

/// Own the child until it exits or a kill is requested.
///
/// A dropped kill sender counts as a kill request.
async fn watch_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    state_tx: watch::Sender<ProcessState>,
) {
    let (result, expected) = tokio::select! {
        status = child.wait() => (status, false),
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "kill request on exited backend");
            }
            (child.wait().await, true)
        }
    };

    let state = match result {
        Ok(status) => {
            if expected {
                tracing::info!(code = ?status.code(), "backend terminated");
            } else {
                log_backend_exited!(code = ?status.code(), "backend process exited");
            }
            ProcessState::Exited(status.code())
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to wait for backend");
            ProcessState::Failed(e.to_string())
        }
    };
    state_tx.send_replace(state);
}

/// Handle to the supervised backend.
///
/// Dropping the handle kills the child.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    readiness: LaunchReadiness,
    state_rx: watch::Receiver<ProcessState>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_task: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn readiness(&self) -> LaunchReadiness {
        self.readiness
    }

    pub fn state(&self) -> ProcessState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state_rx.clone()
    }

    /// Kill the child and wait until its exit is published. Idempotent.
    pub async fn terminate(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        if let Some(task) = self.exit_task.take() {
            let _ = task.await;
        }
    }
}
