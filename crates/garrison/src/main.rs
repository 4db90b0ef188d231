//! Garrison desktop launcher.
//!
//! Boots the backend, the local asset server and (in Satellite role) the
//! connection to a remote backend, then waits for Ctrl-C.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use garrison_lib::config::{
    BootstrapConfig, BootstrapContext, DEFAULT_ASSET_PORT, DEFAULT_BACKEND_PORT,
    UPDATE_CHECK_INTERVAL,
};
use garrison_lib::endpoint::Endpoint;
use garrison_lib::fatal;
use garrison_lib::feedback::{FeedbackController, TerminalSurface};
use garrison_lib::health::{HealthCheck, HealthPolicy, HttpProbe};
use garrison_lib::mode::{self, Resolution, Role, ENDPOINT_FILE_ENV, ROLE_ENV};
use garrison_lib::update::{
    Channel, HttpUpdateService, StderrNotifier, UpdateController, UpdateError,
};
use garrison_lib::Sequencer;
use garrison_telemetry::{default_log_file, log_shutdown, LogFormat, Telemetry, TelemetryConfig};

/// How long shutdown waits for the update loop after the backend is gone.
const UPDATE_STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "garrison", about = "Garrison desktop launcher", version)]
struct Cli {
    /// Log level (RUST_LOG takes precedence).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Console log format.
    #[arg(long, global = true, default_value = "json", value_parser = ["json", "pretty"])]
    log_format: String,

    /// Persistent log file (`run` defaults to the application data dir).
    #[arg(long, global = true, env = "GARRISON_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Inputs of role resolution.
#[derive(Args, Debug)]
struct TargetArgs {
    /// Force a role instead of detecting it (host/server, satellite/client).
    #[arg(long, env = ROLE_ENV, value_parser = parse_role)]
    role: Option<Role>,

    /// Endpoint configuration file; its presence selects Satellite role.
    #[arg(long, env = ENDPOINT_FILE_ENV)]
    endpoint_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full bootstrap, then wait for Ctrl-C.
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Development mode: skip the packaged asset server and update checks.
        #[arg(long)]
        dev: bool,

        /// Directory of the packaged frontend.
        #[arg(long)]
        assets_dir: Option<PathBuf>,

        /// Backend executable (Host role).
        #[arg(long)]
        backend_exe: Option<PathBuf>,

        /// Port of the local asset server.
        #[arg(long, default_value_t = DEFAULT_ASSET_PORT)]
        asset_port: u16,

        /// Port the local backend listens on (Host role).
        #[arg(long, default_value_t = DEFAULT_BACKEND_PORT)]
        backend_port: u16,

        /// Health-check attempts per endpoint.
        #[arg(long, default_value_t = 30)]
        max_attempts: u32,

        /// Pause between health-check attempts, in milliseconds.
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,

        /// Wait for a readiness line at most this long, in milliseconds.
        #[arg(long, default_value_t = 2000)]
        readiness_fallback_ms: u64,

        /// Base URL of the update service; no update checks when unset.
        #[arg(long, env = "GARRISON_UPDATE_URL")]
        update_url: Option<String>,
    },

    /// Print the resolved role and endpoints.
    Resolve {
        #[command(flatten)]
        target: TargetArgs,

        /// Port the local backend listens on (Host role).
        #[arg(long, default_value_t = DEFAULT_BACKEND_PORT)]
        backend_port: u16,

        /// Output format (text or json).
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Run one health-check session against an endpoint.
    Probe {
        #[arg(long, default_value = garrison_lib::endpoint::LOOPBACK)]
        host: String,

        #[arg(long)]
        port: u16,

        #[arg(long, default_value_t = 30)]
        max_attempts: u32,

        #[arg(long, default_value_t = 500)]
        interval_ms: u64,

        /// Per-attempt timeout, in milliseconds.
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },

    /// Check the update service once.
    CheckUpdate {
        #[command(flatten)]
        target: TargetArgs,

        /// Base URL of the update service.
        #[arg(long, env = "GARRISON_UPDATE_URL")]
        update_url: String,

        /// Version to compare against.
        #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
        current_version: String,

        /// Download the update when one is available.
        #[arg(long)]
        download: bool,

        /// Launch the installer after downloading.
        #[arg(long, requires = "download")]
        install: bool,

        /// Directory for downloaded packages.
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },
}

fn parse_role(s: &str) -> Result<Role, String> {
    Role::parse(s).ok_or_else(|| format!("unknown role '{s}' (expected host or satellite)"))
}

/// Resolve the role from flags, env and the endpoint file.
fn resolve_role(target: &TargetArgs) -> (Resolution, Option<PathBuf>) {
    let path = target
        .endpoint_file
        .clone()
        .or_else(mode::default_endpoint_file);
    let resolution = match &path {
        Some(path) => mode::resolve(target.role, path),
        None => mode::resolve_from(target.role, None),
    };
    (resolution, path)
}

fn init_telemetry(cli: &Cli) -> Option<Telemetry> {
    let is_run = matches!(cli.command, Commands::Run { .. });
    let log_file = cli
        .log_file
        .clone()
        .or_else(|| if is_run { default_log_file() } else { None });

    let config = TelemetryConfig::new()
        .with_log_level(&cli.log_level)
        .with_log_format(LogFormat::parse(&cli.log_format).unwrap_or_default())
        .with_console_stderr(!is_run);

    let with_file = match &log_file {
        Some(path) => config.clone().with_log_file(path),
        None => config.clone(),
    };

    match Telemetry::init(with_file) {
        Ok(telemetry) => Some(telemetry),
        Err(e) => {
            eprintln!("warning: {e}");
            // Keep console logging even when the log file cannot be opened
            Telemetry::init(config).ok()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let telemetry = init_telemetry(&cli);
    let log_file = telemetry.as_ref().and_then(Telemetry::log_file);

    match cli.command {
        Commands::Run {
            target,
            dev,
            assets_dir,
            backend_exe,
            asset_port,
            backend_port,
            max_attempts,
            interval_ms,
            readiness_fallback_ms,
            update_url,
        } => {
            let mut config = BootstrapConfig::default()
                .with_dev_mode(dev)
                .with_asset_port(asset_port)
                .with_backend_port(backend_port)
                .with_health(
                    HealthPolicy::default()
                        .with_max_attempts(max_attempts)
                        .with_interval(Duration::from_millis(interval_ms)),
                )
                .with_readiness_fallback(Duration::from_millis(readiness_fallback_ms));
            if let Some(dir) = assets_dir {
                config = config.with_assets_dir(dir);
            }
            if let Some(exe) = backend_exe {
                config = config.with_backend_executable(exe);
            }

            let (resolution, _) = resolve_role(&target);
            let ctx = BootstrapContext::new(resolution, config);
            run_launcher(ctx, update_url, log_file).await
        }
        Commands::Resolve {
            target,
            backend_port,
            format,
        } => run_resolve(&target, backend_port, &format),
        Commands::Probe {
            host,
            port,
            max_attempts,
            interval_ms,
            timeout_ms,
        } => {
            let policy = HealthPolicy::default()
                .with_max_attempts(max_attempts)
                .with_interval(Duration::from_millis(interval_ms))
                .with_per_attempt_timeout(Duration::from_millis(timeout_ms));
            run_probe(Endpoint::new(host, port), policy).await
        }
        Commands::CheckUpdate {
            target,
            update_url,
            current_version,
            download,
            install,
            download_dir,
        } => {
            let (resolution, _) = resolve_role(&target);
            run_check_update(
                &update_url,
                resolution.role,
                &current_version,
                download,
                install,
                download_dir,
            )
            .await
        }
    }
}

async fn run_launcher(
    ctx: BootstrapContext,
    update_url: Option<String>,
    log_file: Option<&Path>,
) -> ExitCode {
    let role = ctx.role;
    let dev = ctx.config.dev_mode;

    let probe = match HttpProbe::new() {
        Ok(probe) => probe,
        Err(e) => return fatal::report(&e, log_file),
    };
    let mut sequencer = Sequencer::new(ctx, probe, TerminalSurface);
    let state_rx = sequencer.subscribe();

    let outcome = tokio::select! {
        outcome = sequencer.run() => outcome,
        _ = tokio::signal::ctrl_c() => {
            let state = *state_rx.borrow();
            log_shutdown!(state = %state, "interrupted during bootstrap");
            return ExitCode::SUCCESS;
        }
    };

    let mut running = match outcome {
        Ok(running) => running,
        Err(e) => return fatal::report(&e, log_file),
    };

    eprintln!("garrison: ready ({role})");
    if let Some(assets) = running.assets() {
        eprintln!(
            "garrison: user interface at http://{}:{}/",
            garrison_lib::endpoint::LOOPBACK,
            assets.local_addr().port()
        );
    }
    eprintln!("garrison: backend at {}", running.backend_endpoint().url());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let update_task = match update_url {
        Some(url) if !dev => spawn_update_loop(&url, role, shutdown_rx),
        _ => None,
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
    }

    log_shutdown!(role = %role, "shutting down");
    let _ = shutdown_tx.send(true);
    running.shutdown().await;
    if let Some(task) = update_task {
        if tokio::time::timeout(UPDATE_STOP_GRACE, task).await.is_err() {
            tracing::warn!("update loop did not stop in time");
        }
    }

    ExitCode::SUCCESS
}

fn spawn_update_loop(
    url: &str,
    role: Role,
    shutdown_rx: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    let service = match HttpUpdateService::new(url) {
        Ok(service) => service,
        Err(e) => {
            tracing::warn!(error = %e, "update checks disabled");
            return None;
        }
    };

    let controller = Arc::new(UpdateController::new(
        service,
        env!("CARGO_PKG_VERSION"),
        Arc::new(StderrNotifier),
    ));
    controller.configure(Channel::for_role(role));
    Some(controller.spawn_periodic(UPDATE_CHECK_INTERVAL, shutdown_rx))
}

fn run_resolve(target: &TargetArgs, backend_port: u16, format: &str) -> ExitCode {
    let (resolution, path) = resolve_role(target);
    let ctx = BootstrapContext::new(
        resolution.clone(),
        BootstrapConfig::default().with_backend_port(backend_port),
    );
    let backend = ctx.backend_endpoint();

    if format == "json" {
        let output = serde_json::json!({
            "role": resolution.role,
            "endpoint": resolution.endpoint,
            "backend": backend,
            "endpoint_file": path,
        });
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("error: failed to render JSON: {e}");
                return ExitCode::from(1);
            }
        }
    } else {
        println!("role: {}", resolution.role);
        println!("backend: {backend}");
        if let Some(path) = path {
            println!("endpoint_file: {}", path.display());
        }
    }

    ExitCode::SUCCESS
}

async fn run_probe(endpoint: Endpoint, policy: HealthPolicy) -> ExitCode {
    let probe = match HttpProbe::new() {
        Ok(probe) => probe,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(1);
        }
    };

    let check = HealthCheck::new(probe, policy);
    let mut feedback = FeedbackController::new(vec![endpoint.clone()], TerminalSurface);

    match check.await_ready(&endpoint, &mut feedback).await {
        Ok(()) => {
            println!("{endpoint} is responding");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run_check_update(
    url: &str,
    role: Role,
    current_version: &str,
    download: bool,
    install: bool,
    download_dir: Option<PathBuf>,
) -> ExitCode {
    match check_update(url, role, current_version, download, install, download_dir).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn check_update(
    url: &str,
    role: Role,
    current_version: &str,
    download: bool,
    install: bool,
    download_dir: Option<PathBuf>,
) -> Result<(), UpdateError> {
    let mut controller = UpdateController::new(
        HttpUpdateService::new(url)?,
        current_version,
        Arc::new(StderrNotifier),
    );
    if let Some(dir) = download_dir {
        controller = controller.with_download_dir(dir);
    }
    let channel = Channel::for_role(role);
    controller.configure(channel);

    let info = controller.check_now().await?;
    if !info.available {
        println!(
            "up to date ({}, channel {})",
            info.current_version,
            channel.as_str()
        );
        return Ok(());
    }

    println!(
        "update available: {} -> {} (channel {})",
        info.current_version,
        info.latest.version,
        channel.as_str()
    );
    if let Some(notes) = &info.latest.notes {
        println!("{notes}");
    }

    if download {
        let package = controller.download().await?;
        println!("downloaded {}", package.display());
    }
    if install {
        controller.install()?;
        println!("installer launched; restart to finish the update");
    }
    Ok(())
}
