//! Bootstrap sequencer: one ordered startup protocol for both roles.
//!
//! ```text
//! Idle -> ResolvingMode -> StartingLocalServer -> AwaitingLocalHealth
//!      -> [StartingBackend]  (Host only)
//!      -> AwaitingBackendHealth -> Ready
//! ```
//!
//! Any leg failing moves the sequencer to `Failed`, stops whatever it had
//! already started and returns an error naming the broken leg. The asset
//! stages are skipped in development mode.

use std::fmt;

use thiserror::Error;
use tokio::sync::watch;

use garrison_assets::{AssetError, AssetServer, AssetServerHandle};
use garrison_telemetry::log_role_resolved;

use crate::config::BootstrapContext;
use crate::endpoint::Endpoint;
use crate::feedback::{FeedbackController, FeedbackSurface};
use crate::health::{HealthCheck, HealthError, Probe};
use crate::mode::Role;
use crate::supervisor::{self, ProcessHandle, SupervisorError};

/// Sequencer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    ResolvingMode,
    StartingLocalServer,
    AwaitingLocalHealth,
    StartingBackend,
    AwaitingBackendHealth,
    Ready,
    Failed,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootstrapState::Idle => "idle",
            BootstrapState::ResolvingMode => "resolving_mode",
            BootstrapState::StartingLocalServer => "starting_local_server",
            BootstrapState::AwaitingLocalHealth => "awaiting_local_health",
            BootstrapState::StartingBackend => "starting_backend",
            BootstrapState::AwaitingBackendHealth => "awaiting_backend_health",
            BootstrapState::Ready => "ready",
            BootstrapState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Fatal bootstrap failures, one per leg of the topology.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("cannot serve the user interface: port {port} is in use or unavailable")]
    AssetBind {
        port: u16,
        #[source]
        source: AssetError,
    },

    #[error("local asset server at {endpoint} did not respond")]
    LocalHealth {
        endpoint: Endpoint,
        #[source]
        source: HealthError,
    },

    #[error(transparent)]
    Launch(#[from] SupervisorError),

    #[error("local service did not start ({endpoint} not responding)")]
    LocalServiceDidNotStart {
        endpoint: Endpoint,
        #[source]
        source: HealthError,
    },

    #[error("cannot reach configured server at {endpoint}")]
    ServerUnreachable {
        endpoint: Endpoint,
        #[source]
        source: HealthError,
    },
}

/// Everything a successful bootstrap started.
pub struct Running {
    role: Role,
    assets: Option<AssetServerHandle>,
    backend: Option<ProcessHandle>,
    backend_endpoint: Endpoint,
}

impl Running {
    pub fn role(&self) -> Role {
        self.role
    }

    /// Local asset server, absent in development mode.
    pub fn assets(&self) -> Option<&AssetServerHandle> {
        self.assets.as_ref()
    }

    /// Supervised backend, Host role only.
    pub fn backend(&self) -> Option<&ProcessHandle> {
        self.backend.as_ref()
    }

    pub fn backend_endpoint(&self) -> &Endpoint {
        &self.backend_endpoint
    }

    /// Terminate the backend and stop the asset server.
    pub async fn shutdown(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            backend.terminate().await;
        }
        if let Some(assets) = self.assets.take() {
            assets.stop().await;
        }
    }
}

/// Drives one bootstrap attempt.
pub struct Sequencer<P, S> {
    ctx: BootstrapContext,
    health: HealthCheck<P>,
    feedback: FeedbackController<S>,
    state_tx: watch::Sender<BootstrapState>,
    history: Vec<BootstrapState>,
}

impl<P: Probe, S: FeedbackSurface> Sequencer<P, S> {
    pub fn new(ctx: BootstrapContext, probe: P, surface: S) -> Self {
        let health = HealthCheck::new(probe, ctx.config.health);
        let feedback = FeedbackController::for_role(ctx.role, &ctx.backend_endpoint(), surface);
        let (state_tx, _) = watch::channel(BootstrapState::Idle);

        Self {
            ctx,
            health,
            feedback,
            state_tx,
            history: vec![BootstrapState::Idle],
        }
    }

    pub fn state(&self) -> BootstrapState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.state_tx.subscribe()
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[BootstrapState] {
        &self.history
    }

    pub fn context(&self) -> &BootstrapContext {
        &self.ctx
    }

    pub fn feedback(&self) -> &FeedbackController<S> {
        &self.feedback
    }

    pub fn health(&self) -> &HealthCheck<P> {
        &self.health
    }

    fn transition(&mut self, next: BootstrapState) {
        tracing::debug!(from = %self.state(), to = %next, "bootstrap transition");
        self.history.push(next);
        self.state_tx.send_replace(next);
    }

    /// Run the sequence to `Ready` or `Failed`.
    pub async fn run(&mut self) -> Result<Running, BootstrapError> {
        self.transition(BootstrapState::ResolvingMode);
        log_role_resolved!(
            role = %self.ctx.role,
            backend = %self.ctx.backend_endpoint(),
            dev_mode = self.ctx.config.dev_mode,
            "role resolved"
        );

        let mut running = Running {
            role: self.ctx.role,
            assets: None,
            backend: None,
            backend_endpoint: self.ctx.backend_endpoint(),
        };

        match self.boot(&mut running).await {
            Ok(()) => {
                self.transition(BootstrapState::Ready);
                Ok(running)
            }
            Err(e) => {
                self.transition(BootstrapState::Failed);
                running.shutdown().await;
                Err(e)
            }
        }
    }

    async fn boot(&mut self, running: &mut Running) -> Result<(), BootstrapError> {
        if !self.ctx.config.dev_mode {
            self.transition(BootstrapState::StartingLocalServer);
            let handle = AssetServer::new(&self.ctx.config.assets_dir)
                .start(self.ctx.config.asset_addr())
                .await
                .map_err(|e| BootstrapError::AssetBind {
                    port: e.port(),
                    source: e,
                })?;
            // Probe the bound port so an ephemeral port (0) works too
            let local = Endpoint::loopback(handle.local_addr().port());
            running.assets = Some(handle);

            self.transition(BootstrapState::AwaitingLocalHealth);
            self.health
                .await_ready(&local, &mut self.feedback)
                .await
                .map_err(|source| BootstrapError::LocalHealth {
                    endpoint: local.clone(),
                    source,
                })?;
        }

        if self.ctx.role == Role::Host {
            self.transition(BootstrapState::StartingBackend);
            let handle = supervisor::launch(self.ctx.backend_launch_spec()).await?;
            running.backend = Some(handle);
        }

        self.transition(BootstrapState::AwaitingBackendHealth);
        let endpoint = running.backend_endpoint.clone();
        let role = self.ctx.role;
        self.health
            .await_ready(&endpoint, &mut self.feedback)
            .await
            .map_err(|source| match role {
                Role::Host => BootstrapError::LocalServiceDidNotStart {
                    endpoint: endpoint.clone(),
                    source,
                },
                Role::Satellite => BootstrapError::ServerUnreachable {
                    endpoint: endpoint.clone(),
                    source,
                },
            })
    }
}
