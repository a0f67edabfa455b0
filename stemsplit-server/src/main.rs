//! stemsplit-server - vocal/instrumental separation service
//!
//! Accepts audio uploads over HTTP, runs the external separation engine on
//! each one and serves the resulting stems.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use stemsplit_server::config::{CliOverrides, ConfigSource, ServiceConfig};
use stemsplit_server::AppState;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Interval between sweeps of abandoned job workspaces
const WORKSPACE_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Command-line arguments for stemsplit-server
#[derive(Parser, Debug)]
#[command(name = "stemsplit-server")]
#[command(about = "Vocal/instrumental stem separation service")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "STEMSPLIT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind (overrides config file)
    #[arg(long, env = "STEMSPLIT_HOST")]
    host: Option<String>,

    /// Port to listen on (overrides config file)
    #[arg(short, long, env = "STEMSPLIT_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ServiceConfig::resolve(&CliOverrides {
        config: args.config,
        host: args.host,
        port: args.port,
    })
    .context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    format!("stemsplit_server={0},stemsplit_common={0},tower_http=info", config.log_level)
                        .into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting stemsplit-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config.source {
        ConfigSource::File(path) => info!("Config: {}", path.display()),
        ConfigSource::Missing(path) => warn!(
            "Config file not found: {} (using built-in defaults)",
            path.display()
        ),
        ConfigSource::Defaults => warn!("No config file found, using built-in defaults"),
    }
    info!(
        "Engine: {} {:?} (timeout {}s)",
        config.engine.program, config.engine.args, config.engine.timeout_secs
    );

    config
        .ensure_directories()
        .await
        .context("Failed to create upload/output directories")?;

    let bind_addr = config.bind_addr();
    let state = AppState::new(config);
    info!(
        "Output layout: {:?}, job slots: {}",
        state.orchestrator.layout(),
        state.orchestrator.available_slots()
    );

    tokio::spawn(sweep_workspaces(state.clone()));

    let app = stemsplit_server::build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    info!("Listening on http://{}", bind_addr);
    info!("Health check: http://{}/health", bind_addr);

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let cancelled = shutdown_state.cancel_all_jobs().await;
            if cancelled > 0 {
                info!("Cancelled {} active job(s)", cancelled);
            }
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Periodically remove job workspaces left behind by interrupted uploads
async fn sweep_workspaces(state: AppState) {
    let max_age = state.config.workspace_max_age;
    let mut interval = tokio::time::interval(WORKSPACE_SWEEP_INTERVAL);

    loop {
        interval.tick().await;
        match state
            .orchestrator
            .workspaces()
            .cleanup_old_workspaces(max_age)
            .await
        {
            Ok(0) => {}
            Ok(removed) => info!("Removed {} stale workspace(s)", removed),
            Err(e) => error!(error = %e, "Workspace sweep failed"),
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
