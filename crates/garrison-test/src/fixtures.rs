//! Reusable pieces for bootstrap scenarios: asset directories, fake
//! backends, scripted probes and a recording feedback surface.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use garrison_lib::endpoint::Endpoint;
use garrison_lib::feedback::FeedbackSurface;
use garrison_lib::health::{Probe, ProbeError};

use crate::TestError;

/// Absolute path to the shared test fixtures directory.
pub fn fixtures_dir() -> PathBuf {
    // CARGO_MANIFEST_DIR = .../crates/garrison-test
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("tests")
        .join("fixtures")
}

/// A temporary frontend build with an `index.html`.
pub struct AssetDir {
    dir: TempDir,
}

impl AssetDir {
    pub fn new() -> Result<Self, TestError> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("index.html"), "<html>garrison</html>")?;
        std::fs::create_dir_all(dir.path().join("assets"))?;
        std::fs::write(dir.path().join("assets/app.js"), "export {}")?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// A fake backend: a shell script run through `/bin/sh`.
pub struct BackendScript {
    _dir: TempDir,
    script: PathBuf,
}

impl BackendScript {
    fn write(body: &str) -> Result<Self, TestError> {
        let dir = TempDir::new()?;
        let script = dir.path().join("backend.sh");
        std::fs::write(&script, body)?;
        Ok(Self { _dir: dir, script })
    }

    /// Announces readiness, then idles.
    pub fn listening() -> Result<Self, TestError> {
        Self::write("echo \"backend listening on $HOST:$PORT\"\nsleep 60\n")
    }

    /// Creates `marker` on start, then announces readiness and idles.
    pub fn touching(marker: &Path) -> Result<Self, TestError> {
        Self::write(&format!(
            "touch '{}'\necho \"backend listening on $HOST:$PORT\"\nsleep 60\n",
            marker.display()
        ))
    }

    /// Never prints anything.
    pub fn silent() -> Result<Self, TestError> {
        Self::write("sleep 60\n")
    }

    /// Writes to stderr only.
    pub fn noisy_stderr() -> Result<Self, TestError> {
        Self::write("echo 'warning: cache is cold' >&2\nsleep 60\n")
    }

    pub fn executable(&self) -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    pub fn args(&self) -> Vec<String> {
        vec![self.script.display().to_string()]
    }
}

/// Probe with per-endpoint failure scripts; unlisted endpoints answer
/// immediately. Records every attempt.
#[derive(Default)]
pub struct ScriptedProbe {
    failures: HashMap<Endpoint, u32>,
    attempts: Mutex<Vec<Endpoint>>,
}

impl ScriptedProbe {
    pub fn healthy() -> Self {
        Self::default()
    }

    /// Fail the first `count` attempts against `endpoint`.
    pub fn fail(mut self, endpoint: Endpoint, count: u32) -> Self {
        self.failures.insert(endpoint, count);
        self
    }

    /// Never answer for `endpoint`.
    pub fn unreachable(self, endpoint: Endpoint) -> Self {
        self.fail(endpoint, u32::MAX)
    }

    pub fn attempts_for(&self, endpoint: &Endpoint) -> u32 {
        self.attempts.lock().iter().filter(|e| *e == endpoint).count() as u32
    }

    pub fn total_attempts(&self) -> usize {
        self.attempts.lock().len()
    }
}

impl Probe for ScriptedProbe {
    async fn probe(&self, endpoint: &Endpoint, _timeout: Duration) -> Result<(), ProbeError> {
        let previous = {
            let mut attempts = self.attempts.lock();
            let previous = attempts.iter().filter(|e| *e == endpoint).count() as u32;
            attempts.push(endpoint.clone());
            previous
        };

        match self.failures.get(endpoint) {
            Some(&count) if previous < count => {
                Err(ProbeError::Connect("connection refused".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// What a feedback surface was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Show(String),
    Update(String),
    Close,
}

/// Feedback surface that records calls; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    calls: Arc<Mutex<Vec<SurfaceCall>>>,
}

impl RecordingSurface {
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().clone()
    }
}

impl FeedbackSurface for RecordingSurface {
    fn show(&mut self, _endpoint: &Endpoint, message: &str) {
        self.calls.lock().push(SurfaceCall::Show(message.to_string()));
    }

    fn update(&mut self, message: &str) {
        self.calls.lock().push(SurfaceCall::Update(message.to_string()));
    }

    fn close(&mut self) {
        self.calls.lock().push(SurfaceCall::Close);
    }
}

/// GET `url` without proxies or redirects; returns status and body.
pub async fn fetch(url: &str) -> Result<(u16, String), TestError> {
    let client = reqwest::Client::builder()
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let response = client.get(url).send().await?;
    let status = response.status().as_u16();
    Ok((status, response.text().await?))
}
