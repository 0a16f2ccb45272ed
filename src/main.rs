//! `vigil` - a proactive, always-on agent runtime
//!
//! This binary is a thin bootstrap: parse flags, load configuration,
//! initialize logging, assemble the runtime, and drive the heartbeat until
//! the process is told to stop.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use vigil_core::{RuntimeBuilder, RuntimeConfig};

mod plugins;

#[derive(Parser)]
#[command(name = "vigil", version, about = "Proactive agent runtime")]
struct Cli {
    /// Path to the config file (default: <data dir>/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the data directory (state, schedules, storage)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run a single tick and exit; useful as a smoke test
    #[arg(long)]
    once: bool,
}

/// Main entry point. Exit code 0 on a clean shutdown; any init error
/// propagates and exits non-zero.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        RuntimeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.apply_env(|key| std::env::var(key).ok());
    if let Some(data_dir) = cli.data_dir {
        config.data_path = Some(data_dir);
    }

    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_HASH"),
        "starting vigil"
    );

    let mut builder = RuntimeBuilder::from_config(config);
    for plugin in plugins::builtin_plugins() {
        builder = builder.with_plugin(plugin);
    }
    if cli.once {
        builder = builder.ephemeral();
    }
    let mut runtime = builder.build().context("Failed to assemble runtime")?;

    if cli.once {
        runtime.heartbeat.tick().await?;
        runtime.metrics.flush();
        return Ok(());
    }

    spawn_shutdown_listener(runtime.cancel.clone());
    runtime.heartbeat.run().await?;
    tracing::info!("vigil stopped");
    Ok(())
}

/// Cancel the runtime on SIGINT or SIGTERM. New signal ingestion stops,
/// the tick in flight completes, ports are stopped, metrics flushed.
fn spawn_shutdown_listener(cancel: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => tracing::info!("SIGINT received"),
                _ = sigterm.recv() => tracing::info!("SIGTERM received"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("interrupt received");
        }

        cancel.cancel();
    });
}
