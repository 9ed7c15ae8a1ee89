//! FileMirrorSync client entry point.

mod config;
mod manifest_builder;
mod protocol;
mod state_store;
mod sync_runner;
mod transfer;
mod utils;

use clap::Parser;
use config::ClientConfig;
use std::path::PathBuf;
use sync_runner::SyncRunner;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the client configuration file
    #[arg(short, long, value_name = "FILE", default_value = "sync-client.toml")]
    config: PathBuf,

    /// Run continuously, re-syncing every `interval` seconds instead of once
    #[arg(long)]
    daemon: bool,

    /// Interval between passes when --daemon is set
    #[arg(long, default_value_t = 300)]
    interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ClientConfig::from_file(&args.config)?;

    utils::logger::init(&config.log.level)?;

    tracing::info!(
        "Starting sync-client v{} (client_id={}, dataset_id={}, root={})",
        env!("CARGO_PKG_VERSION"),
        config.client.id,
        config.server.dataset_id,
        config.sync.root.display(),
    );

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown_cancel.cancel();
    });

    let runner = SyncRunner::new(config);

    if !args.daemon {
        run_pass(&runner, cancel).await;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(args.interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => run_pass(&runner, cancel.clone()).await,
            _ = cancel.cancelled() => {
                tracing::info!("shutdown requested, exiting daemon loop");
                break;
            }
        }
    }

    Ok(())
}

async fn run_pass(runner: &SyncRunner, cancel: CancellationToken) {
    match runner.run_once(cancel).await {
        Ok(report) => tracing::info!(
            uploaded = report.uploaded,
            deleted = report.deleted,
            failed = report.failed,
            "sync pass complete"
        ),
        Err(e) => tracing::error!("sync pass failed: {e}"),
    }
}

async fn wait_for_shutdown_signal() {
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
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
