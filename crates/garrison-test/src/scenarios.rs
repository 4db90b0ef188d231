//! End-to-end bootstrap scenarios with real asset servers and backend
//! processes, and scripted health probes.

use std::time::{Duration, Instant};

use garrison_lib::bootstrap::{BootstrapError, BootstrapState, Sequencer};
use garrison_lib::config::{BootstrapConfig, BootstrapContext};
use garrison_lib::endpoint::Endpoint;
use garrison_lib::health::{HealthPolicy, HttpProbe};
use garrison_lib::mode::{self, Role};
use garrison_lib::supervisor::{LaunchReadiness, ProcessState, SupervisorError};

use crate::fixtures::{
    fetch, fixtures_dir, AssetDir, BackendScript, RecordingSurface, ScriptedProbe, SurfaceCall,
};

const REMOTE: &str = "IP=10.0.0.5\nBackendPort=9090\n";

fn remote() -> Endpoint {
    Endpoint::new("10.0.0.5", 9090)
}

/// Loopback-only asset server on an ephemeral port, fast retries.
fn base_config(assets: &AssetDir) -> BootstrapConfig {
    BootstrapConfig::default()
        .with_assets_dir(assets.path())
        .with_asset_bind("127.0.0.1".parse().unwrap())
        .with_asset_port(0)
        .with_backend_port(free_port())
        .with_health(
            HealthPolicy::default()
                .with_max_attempts(30)
                .with_interval(Duration::from_millis(10)),
        )
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn with_backend(config: BootstrapConfig, backend: &BackendScript) -> BootstrapConfig {
    config
        .with_backend_executable(backend.executable())
        .with_backend_args(backend.args())
}

#[tokio::test]
async fn host_healthy_path_reaches_ready_without_feedback() {
    let assets = AssetDir::new().unwrap();
    let backend = BackendScript::listening().unwrap();
    let config = with_backend(base_config(&assets), &backend);
    let backend_endpoint = Endpoint::loopback(config.backend_port);

    let ctx = BootstrapContext::new(mode::resolve_from(None, None), config);
    let surface = RecordingSurface::default();
    let mut seq = Sequencer::new(ctx, ScriptedProbe::healthy(), surface.clone());

    let mut running = seq.run().await.unwrap();

    assert_eq!(
        seq.history(),
        &[
            BootstrapState::Idle,
            BootstrapState::ResolvingMode,
            BootstrapState::StartingLocalServer,
            BootstrapState::AwaitingLocalHealth,
            BootstrapState::StartingBackend,
            BootstrapState::AwaitingBackendHealth,
            BootstrapState::Ready,
        ]
    );
    assert!(surface.calls().is_empty());
    assert_eq!(seq.health().probe().attempts_for(&backend_endpoint), 1);
    assert_eq!(running.role(), Role::Host);

    let process = running.backend().expect("host owns a backend");
    assert_eq!(process.readiness(), LaunchReadiness::Signal);
    assert_eq!(process.state(), ProcessState::Running);
    let mut process_rx = process.subscribe();

    running.shutdown().await;
    assert!(process_rx.borrow_and_update().is_terminal());
}

#[tokio::test]
async fn host_silent_backend_uses_readiness_fallback() {
    let assets = AssetDir::new().unwrap();
    let backend = BackendScript::noisy_stderr().unwrap();
    let config = with_backend(base_config(&assets), &backend)
        .with_readiness_fallback(Duration::from_millis(100));

    let ctx = BootstrapContext::new(mode::resolve_from(Some(Role::Host), None), config);
    let mut seq = Sequencer::new(ctx, ScriptedProbe::healthy(), RecordingSurface::default());

    let mut running = seq.run().await.unwrap();
    assert_eq!(
        running.backend().map(|b| b.readiness()),
        Some(LaunchReadiness::Fallback)
    );
    running.shutdown().await;
}

#[tokio::test]
async fn satellite_degraded_network_shows_one_surface() {
    let assets = AssetDir::new().unwrap();
    let ctx = BootstrapContext::new(mode::resolve_from(None, Some(REMOTE)), base_config(&assets));
    let surface = RecordingSurface::default();
    let probe = ScriptedProbe::healthy().fail(remote(), 2);
    let mut seq = Sequencer::new(ctx, probe, surface.clone());

    let mut running = seq.run().await.unwrap();

    assert_eq!(
        surface.calls(),
        vec![
            SurfaceCall::Show("Connecting to 10.0.0.5:9090...".to_string()),
            SurfaceCall::Update("Retrying connection (attempt 2 of 30)...".to_string()),
            SurfaceCall::Close,
        ]
    );
    assert_eq!(seq.health().probe().attempts_for(&remote()), 3);
    assert!(!seq.history().contains(&BootstrapState::StartingBackend));
    assert_eq!(seq.state(), BootstrapState::Ready);
    assert!(running.backend().is_none());

    running.shutdown().await;
}

#[tokio::test]
async fn host_missing_executable_fails_without_health_checks() {
    let assets = AssetDir::new().unwrap();
    let config = base_config(&assets).with_backend_executable("/nonexistent/garrison-backend");
    let backend_endpoint = Endpoint::loopback(config.backend_port);

    let ctx = BootstrapContext::new(mode::resolve_from(None, None), config);
    let surface = RecordingSurface::default();
    let mut seq = Sequencer::new(ctx, ScriptedProbe::healthy(), surface.clone());

    let err = seq.run().await.err().expect("bootstrap should fail");

    assert!(matches!(
        err,
        BootstrapError::Launch(SupervisorError::ExecutableNotFound(_))
    ));
    assert_eq!(
        err.to_string(),
        "backend executable not found at /nonexistent/garrison-backend"
    );
    assert_eq!(
        &seq.history()[seq.history().len() - 2..],
        &[BootstrapState::StartingBackend, BootstrapState::Failed]
    );
    assert_eq!(seq.health().probe().attempts_for(&backend_endpoint), 0);
    assert!(surface.calls().is_empty());
}

#[tokio::test]
async fn satellite_exhaustion_fails_after_exact_attempts() {
    let assets = AssetDir::new().unwrap();
    let interval = Duration::from_millis(10);
    let per_attempt = Duration::from_secs(5);
    let config = base_config(&assets).with_health(
        HealthPolicy::default()
            .with_max_attempts(3)
            .with_interval(interval)
            .with_per_attempt_timeout(per_attempt),
    );

    let ctx = BootstrapContext::new(mode::resolve_from(None, Some(REMOTE)), config);
    let surface = RecordingSurface::default();
    let mut seq = Sequencer::new(ctx, ScriptedProbe::healthy().unreachable(remote()), surface.clone());

    let start = Instant::now();
    let err = seq.run().await.err().expect("bootstrap should fail");
    let elapsed = start.elapsed();

    assert_eq!(err.to_string(), "cannot reach configured server at 10.0.0.5:9090");
    assert_eq!(seq.state(), BootstrapState::Failed);
    assert_eq!(seq.health().probe().attempts_for(&remote()), 3);
    assert!(elapsed >= interval * 2, "elapsed {elapsed:?}");
    assert!(elapsed < interval * 2 + per_attempt, "elapsed {elapsed:?}");
    assert_eq!(
        surface.calls(),
        vec![
            SurfaceCall::Show("Connecting to 10.0.0.5:9090...".to_string()),
            SurfaceCall::Update("Retrying connection (attempt 2 of 3)...".to_string()),
            SurfaceCall::Close,
        ]
    );
}

#[tokio::test]
async fn host_backend_exhaustion_reports_local_service() {
    let assets = AssetDir::new().unwrap();
    let backend = BackendScript::silent().unwrap();
    let config = with_backend(base_config(&assets), &backend)
        .with_readiness_fallback(Duration::from_millis(50))
        .with_health(
            HealthPolicy::default()
                .with_max_attempts(2)
                .with_interval(Duration::from_millis(10)),
        );
    let backend_endpoint = Endpoint::loopback(config.backend_port);

    let ctx = BootstrapContext::new(mode::resolve_from(None, None), config);
    let surface = RecordingSurface::default();
    let probe = ScriptedProbe::healthy().unreachable(backend_endpoint.clone());
    let mut seq = Sequencer::new(ctx, probe, surface.clone());

    let err = seq.run().await.err().expect("bootstrap should fail");

    assert_eq!(
        err.to_string(),
        format!("local service did not start ({backend_endpoint} not responding)")
    );
    assert_eq!(seq.health().probe().attempts_for(&backend_endpoint), 2);
    // Host endpoints never open the feedback surface
    assert!(surface.calls().is_empty());
}

#[tokio::test]
async fn host_local_health_exhaustion_never_launches_backend() {
    let assets = AssetDir::new().unwrap();
    let marker_dir = tempfile::TempDir::new().unwrap();
    let marker = marker_dir.path().join("started");
    let backend = BackendScript::touching(&marker).unwrap();

    let asset_port = free_port();
    let config = with_backend(base_config(&assets), &backend)
        .with_asset_port(asset_port)
        .with_health(
            HealthPolicy::default()
                .with_max_attempts(3)
                .with_interval(Duration::from_millis(10)),
        );
    let backend_endpoint = Endpoint::loopback(config.backend_port);
    let asset_endpoint = Endpoint::loopback(asset_port);

    let ctx = BootstrapContext::new(mode::resolve_from(None, None), config);
    let surface = RecordingSurface::default();
    let probe = ScriptedProbe::healthy().unreachable(asset_endpoint.clone());
    let mut seq = Sequencer::new(ctx, probe, surface.clone());

    let err = seq.run().await.err().expect("bootstrap should fail");

    assert!(matches!(err, BootstrapError::LocalHealth { .. }));
    assert_eq!(
        err.to_string(),
        format!("local asset server at {asset_endpoint} did not respond")
    );
    assert_eq!(
        &seq.history()[seq.history().len() - 2..],
        &[BootstrapState::AwaitingLocalHealth, BootstrapState::Failed]
    );
    assert!(!seq.history().contains(&BootstrapState::StartingBackend));
    assert_eq!(seq.health().probe().attempts_for(&asset_endpoint), 3);
    assert_eq!(seq.health().probe().attempts_for(&backend_endpoint), 0);
    assert!(surface.calls().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!marker.exists(), "backend process was started");

    // The asset listener was released on failure
    std::net::TcpListener::bind(("127.0.0.1", asset_port)).unwrap();
}

#[tokio::test]
async fn satellite_local_health_exhaustion_fails() {
    let assets = AssetDir::new().unwrap();
    let asset_port = free_port();
    let config = base_config(&assets)
        .with_asset_port(asset_port)
        .with_health(
            HealthPolicy::default()
                .with_max_attempts(2)
                .with_interval(Duration::from_millis(10)),
        );
    let asset_endpoint = Endpoint::loopback(asset_port);

    let ctx = BootstrapContext::new(mode::resolve_from(None, Some(REMOTE)), config);
    let probe = ScriptedProbe::healthy().unreachable(asset_endpoint.clone());
    let mut seq = Sequencer::new(ctx, probe, RecordingSurface::default());

    let err = seq.run().await.err().expect("bootstrap should fail");

    assert_eq!(
        err.to_string(),
        format!("local asset server at {asset_endpoint} did not respond")
    );
    assert_eq!(seq.state(), BootstrapState::Failed);
    assert!(!seq.history().contains(&BootstrapState::AwaitingBackendHealth));
    assert_eq!(seq.health().probe().attempts_for(&remote()), 0);
}

#[tokio::test]
async fn satellite_against_live_server_serves_assets() {
    let remote = wiremock::MockServer::start().await;
    let port = remote.address().port();
    let endpoint_file = format!("IP=127.0.0.1\nBackendPort={port}\n");

    let config = BootstrapConfig::default()
        .with_assets_dir(fixtures_dir().join("assets"))
        .with_asset_bind("127.0.0.1".parse().unwrap())
        .with_asset_port(0)
        .with_health(
            HealthPolicy::default()
                .with_max_attempts(5)
                .with_interval(Duration::from_millis(10)),
        );
    let ctx = BootstrapContext::new(mode::resolve_from(None, Some(endpoint_file.as_str())), config);
    let mut seq = Sequencer::new(ctx, HttpProbe::new().unwrap(), RecordingSurface::default());

    let mut running = seq.run().await.unwrap();
    assert_eq!(running.backend_endpoint(), &Endpoint::loopback(port));

    let addr = running.assets().expect("asset server running").local_addr();
    let (status, body) = fetch(&format!("http://{addr}/settings/profile"))
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert!(body.contains("<title>Garrison</title>"));

    running.shutdown().await;
}

#[tokio::test]
async fn dev_mode_skips_asset_server() {
    let config = BootstrapConfig::default()
        .with_dev_mode(true)
        .with_health(HealthPolicy::default().with_max_attempts(1));
    let ctx = BootstrapContext::new(mode::resolve_from(None, Some(REMOTE)), config);
    let mut seq = Sequencer::new(ctx, ScriptedProbe::healthy(), RecordingSurface::default());

    let running = seq.run().await.unwrap();

    assert!(running.assets().is_none());
    assert!(!seq.history().contains(&BootstrapState::StartingLocalServer));
    assert_eq!(seq.health().probe().total_attempts(), 1);
}
