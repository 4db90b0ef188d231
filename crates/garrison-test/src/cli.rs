//! CLI regression tests for the `garrison` binary.
//!
//! These tests invoke the binary as a subprocess to catch regressions in flag
//! names, exit codes, and output formats.
//!
//! Run with: `cargo test -p garrison-test`
//! Requires the `garrison` binary to be built first (`cargo build -p garrison`).

use std::io::{Read, Write};
use std::net::TcpListener;

use assert_cmd::assert::OutputAssertExt;
use assert_cmd::Command;
use predicates::str::contains;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::fixtures::fixtures_dir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Returns an assert_cmd Command wrapping the `garrison` binary, isolated
/// from the caller's role and endpoint settings.
fn garrison() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("garrison")
        .expect("garrison binary not found, run `cargo build -p garrison` first");
    cmd.env_remove("GARRISON_ROLE")
        .env_remove("GARRISON_ENDPOINT_FILE")
        .env_remove("GARRISON_UPDATE_URL")
        .env_remove("GARRISON_LOG_FILE")
        .env_remove("RUST_LOG");
    cmd
}

/// Answer every connection with an empty 204 on a background thread.
fn serve_forever() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
        for mut stream in listener.incoming().flatten() {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let _ = stream
                .write_all(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        }
    });
    port
}

fn closed_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

// ---------------------------------------------------------------------------
// garrison resolve
// ---------------------------------------------------------------------------

#[test]
fn resolve_without_endpoint_file_is_host() {
    let dir = TempDir::new().unwrap();
    let output = garrison()
        .args(["resolve", "--format", "json", "--endpoint-file"])
        .arg(dir.path().join("absent.conf"))
        .output()
        .unwrap();

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["role"], "host");
    assert!(json["endpoint"].is_null());
    assert_eq!(json["backend"]["host"], "127.0.0.1");
    assert_eq!(json["backend"]["port"], 3001);
}

#[test]
fn resolve_with_endpoint_file_is_satellite() {
    garrison()
        .args(["resolve", "--endpoint-file"])
        .arg(fixtures_dir().join("endpoint-satellite.conf"))
        .assert()
        .success()
        .stdout(contains("role: satellite"))
        .stdout(contains("backend: 10.0.0.5:9090"));
}

#[test]
fn resolve_bad_port_falls_back_to_default() {
    let output = garrison()
        .args(["resolve", "--format", "json", "--endpoint-file"])
        .arg(fixtures_dir().join("endpoint-bad-port.conf"))
        .output()
        .unwrap();

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["role"], "satellite");
    assert_eq!(json["endpoint"]["ip"], "10.0.0.5");
    assert_eq!(json["endpoint"]["backend_port"], 3001);
}

#[test]
fn resolve_role_override_from_env() {
    garrison()
        .env("GARRISON_ROLE", "host")
        .args(["resolve", "--endpoint-file"])
        .arg(fixtures_dir().join("endpoint-satellite.conf"))
        .assert()
        .success()
        .stdout(contains("role: host"))
        .stdout(contains("backend: 127.0.0.1:3001"));
}

#[test]
fn resolve_unknown_role_is_usage_error() {
    garrison()
        .args(["resolve", "--role", "standalone"])
        .assert()
        .failure()
        .code(2)
        .stderr(contains("unknown role"));
}

// ---------------------------------------------------------------------------
// garrison probe
// ---------------------------------------------------------------------------

#[test]
fn probe_live_endpoint_exits_zero() {
    let port = serve_forever();
    garrison()
        .args(["probe", "--port", &port.to_string(), "--max-attempts", "3"])
        .assert()
        .success()
        .stdout(contains("is responding"));
}

#[test]
fn probe_closed_port_exits_one() {
    let port = closed_port();
    garrison()
        .args([
            "probe",
            "--port",
            &port.to_string(),
            "--max-attempts",
            "2",
            "--interval-ms",
            "10",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("did not respond after 2 attempt(s)"))
        .stderr(contains("Connecting to 127.0.0.1"));
}

// ---------------------------------------------------------------------------
// garrison run
// ---------------------------------------------------------------------------

#[test]
fn run_missing_backend_exits_one_naming_path() {
    let dir = TempDir::new().unwrap();
    let log_file = dir.path().join("logs").join("garrison.log");

    garrison()
        .args(["run", "--role", "host", "--asset-port", "0"])
        .arg("--assets-dir")
        .arg(fixtures_dir().join("assets"))
        .args(["--backend-exe", "/nonexistent/garrison-backend"])
        .arg("--log-file")
        .arg(&log_file)
        .assert()
        .failure()
        .code(1)
        .stderr(contains(
            "backend executable not found at /nonexistent/garrison-backend",
        ))
        .stderr(contains("details were written to"));

    let log = std::fs::read_to_string(&log_file).unwrap();
    assert!(log.contains("\"event\":\"fatal\""), "log: {log}");
}

#[test]
fn run_satellite_unreachable_exits_one() {
    let dir = TempDir::new().unwrap();
    let endpoint_file = dir.path().join("endpoint.conf");
    std::fs::write(
        &endpoint_file,
        format!("IP=127.0.0.1\nBackendPort={}\n", closed_port()),
    )
    .unwrap();

    garrison()
        .args(["run", "--dev", "--max-attempts", "2", "--interval-ms", "10"])
        .arg("--endpoint-file")
        .arg(&endpoint_file)
        .arg("--log-file")
        .arg(dir.path().join("garrison.log"))
        .assert()
        .failure()
        .code(1)
        .stderr(contains("cannot reach configured server at 127.0.0.1:"));
}

// ---------------------------------------------------------------------------
// garrison check-update
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn check_update_reports_available_version() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/server/latest.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "version": "1.1.0",
            "url": format!("{}/packages/garrison-1.1.0.bin", server.uri()),
            "sha256": "00",
        })))
        .mount(&server)
        .await;
    let uri = server.uri();

    // The binary blocks, so keep it off the runtime threads
    let output = tokio::task::spawn_blocking(move || {
        garrison()
            .args(["check-update", "--role", "host", "--current-version", "1.0.0"])
            .args(["--update-url", &uri])
            .output()
    })
    .await
    .unwrap()
    .unwrap();

    output
        .assert()
        .success()
        .stdout(contains("update available: 1.0.0 -> 1.1.0 (channel server)"));
}

#[tokio::test(flavor = "multi_thread")]
async fn check_update_up_to_date() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/client/latest.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "version": "1.0.0",
            "url": "https://updates.invalid/garrison-1.0.0.bin",
            "sha256": "00",
        })))
        .mount(&server)
        .await;
    let uri = server.uri();

    // The binary blocks, so keep it off the runtime threads
    let output = tokio::task::spawn_blocking(move || {
        garrison()
            .args(["check-update", "--role", "satellite", "--current-version", "1.0.0"])
            .args(["--update-url", &uri])
            .output()
    })
    .await
    .unwrap()
    .unwrap();

    output.assert().success().stdout(contains("up to date (1.0.0, channel client)"));
}
