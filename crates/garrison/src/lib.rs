//! Garrison: bootstrap and connection orchestration for a multi-process
//! desktop application.
//!
//! The launcher decides whether this instance is a Host (owns the backend)
//! or a Satellite (talks to a remote backend), serves the packaged frontend
//! locally, supervises the backend process, health-checks every leg of the
//! topology with bounded retries and user feedback, and runs a background
//! update loop once everything is ready.
//!
//! # Usage
//!
//! ```ignore
//! use garrison_lib::bootstrap::Sequencer;
//! use garrison_lib::config::{BootstrapConfig, BootstrapContext};
//! use garrison_lib::feedback::TerminalSurface;
//! use garrison_lib::health::HttpProbe;
//! use garrison_lib::mode;
//!
//! let resolution = mode::resolve(None, &endpoint_file);
//! let ctx = BootstrapContext::new(resolution, BootstrapConfig::default());
//! let mut sequencer = Sequencer::new(ctx, HttpProbe::new()?, TerminalSurface);
//! let mut running = sequencer.run().await?;
//! // ...
//! running.shutdown().await;
//! ```

pub mod bootstrap;
pub mod config;
pub mod endpoint;
pub mod fatal;
pub mod feedback;
pub mod health;
pub mod mode;
pub mod supervisor;
pub mod update;

pub use bootstrap::{BootstrapError, BootstrapState, Running, Sequencer};
pub use config::{BootstrapConfig, BootstrapContext};
pub use endpoint::Endpoint;
pub use health::{HealthCheck, HealthEvent, HealthObserver, HealthPolicy, HttpProbe, Probe};
pub use mode::{EndpointConfig, Resolution, Role};
