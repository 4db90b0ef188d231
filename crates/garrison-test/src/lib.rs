//! Test harnesses for the Garrison launcher.
//!
//! Provides fixtures for full bootstrap scenarios (asset directories, fake
//! backends, scripted probes, recording feedback surfaces) plus CLI and
//! HTTP regression tests.

#[cfg(test)]
mod cli;
pub mod fixtures;
#[cfg(test)]
mod scenarios;

pub use fixtures::{
    fetch, fixtures_dir, AssetDir, BackendScript, RecordingSurface, ScriptedProbe, SurfaceCall,
};

use thiserror::Error;

/// Errors from fixture setup.
#[derive(Debug, Error)]
pub enum TestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
