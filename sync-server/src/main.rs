//! FileMirrorSync server entry point.

mod auth;
mod config;
mod delete;
mod diff;
mod error;
mod merge;
mod routes;
mod state;
mod upload_session;

use clap::Parser;
use config::ServerConfig;
use state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the server configuration file
    #[arg(short, long, value_name = "FILE", default_value = "sync-server.toml")]
    config: PathBuf,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = ServerConfig::from_file(&args.config)?;
    if let Some(port) = args.port {
        config.port = port;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        "Starting sync-server v{} (inbound_root={}, temp_root={})",
        env!("CARGO_PKG_VERSION"),
        config.inbound_root.display(),
        config.temp_root.display(),
    );

    let session_horizon_secs = config.session_horizon_secs;
    let state = Arc::new(AppState::new(config.clone()));

    let cancel = CancellationToken::new();
    spawn_session_reaper(state.clone(), cancel.clone(), session_horizon_secs);

    let app = routes::create_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Shutting down...");
    cancel.cancel();

    Ok(())
}

/// Periodically evicts upload sessions that have outlived `session_horizon_secs`
/// without completing (spec §4.9).
fn spawn_session_reaper(state: Arc<AppState>, cancel: CancellationToken, horizon_secs: u64) {
    let period = Duration::from_secs((horizon_secs / 4).max(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => upload_session::collect_stale(&state),
                _ = cancel.cancelled() => break,
            }
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
