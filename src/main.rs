//! ffm_cache - Storage engine maintenance daemon
//!
//! Opens the file-backed engine and keeps it tidy with the periodic
//! optimizer. Also exports and imports snapshot files.
//!
//! # Usage
//! - `ffm_cache` - run the optimizer until Ctrl+C/SIGTERM
//! - `ffm_cache backup <path>` - write a snapshot to `path`
//! - `ffm_cache restore <path>` - restore the snapshot at `path`

use std::env;
use std::fs;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ffm_cache::{Config, EngineHandle};

/// Main entry point.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the engine over the configured data directory
/// 4. Run the requested command
#[tokio::main]
async fn main() -> Result<()> {
    // Defaults to "info" for this crate, can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ffm_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Configuration loaded: data_dir={}, total_quota={}, max_entries={}, cleanup_interval={}ms",
        config.data_dir.display(),
        config.total_quota,
        config.max_entries,
        config.cleanup_interval
    );

    let handle = EngineHandle::from_config(&config)
        .with_context(|| format!("opening storage at {}", config.data_dir.display()))?;

    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [] => run_daemon(handle).await,
        [command, path] if command == "backup" => {
            let json = handle
                .engine
                .read()
                .await
                .create_backup()
                .to_json()
                .context("serializing backup")?;
            fs::write(path, json).with_context(|| format!("writing backup to {}", path))?;
            info!("Backup written to {}", path);
            Ok(())
        }
        [command, path] if command == "restore" => {
            let json =
                fs::read_to_string(path).with_context(|| format!("reading backup {}", path))?;
            let result = handle.engine.write().await.restore_from_json(&json);
            if !result.success {
                bail!(
                    "restore failed: {}",
                    result.error.unwrap_or_else(|| "unknown error".into())
                );
            }
            info!("Backup restored from {}", path);
            Ok(())
        }
        _ => bail!("usage: ffm_cache [backup <path> | restore <path>]"),
    }
}

async fn run_daemon(handle: EngineHandle) -> Result<()> {
    let metrics = handle.engine.read().await.metrics();
    info!(
        "Storage opened: {} entries, {} files, {} bytes used",
        metrics.entry_count,
        handle.engine.read().await.get_all_files().len(),
        metrics.total_size
    );

    let optimizer = handle.spawn_optimizer().await;
    info!("Periodic optimizer started");

    shutdown_signal(optimizer).await?;

    let metrics = handle.engine.read().await.metrics();
    info!(
        "Shutdown complete: {} entries, hit rate {:.2}",
        metrics.entry_count, metrics.hit_rate
    );
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then aborts the optimizer.
async fn shutdown_signal(optimizer: JoinHandle<()>) -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("installing Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("installing SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        }
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    optimizer.abort();
    warn!("Optimizer task aborted");
    Ok(())
}
