//! galaxyd - worker control daemon

use anyhow::{Context, Result};
use clap::Parser;
use galaxy_common::Slot;
use galaxyd::config::{DaemonConfig, CONFIG_PATH};
use galaxyd::{server, signals, Daemon};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Control plane for the five galaxy worker slots
#[derive(Parser, Debug)]
#[command(name = "galaxyd")]
#[command(version, long_about = None)]
struct Args {
    /// Config file (missing file means defaults)
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Directory holding worker scripts and config files
    #[arg(long)]
    backend_path: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:7860
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("[BOOT] galaxyd v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = DaemonConfig::load(&args.config).context("Failed to load configuration")?;
    if let Some(path) = args.backend_path {
        config.backend_path = path;
    }
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    if !config.backend_path.is_dir() {
        error!(
            "[FATAL] Galaxy backend directory not found at {}",
            config.backend_path.display()
        );
        std::process::exit(1);
    }

    let naming = config.naming();
    let missing: Vec<String> = Slot::all()
        .map(|slot| naming.script_file(slot))
        .filter(|script| !config.backend_path.join(script).exists())
        .collect();
    if !missing.is_empty() {
        warn!("[BOOT] Missing scripts: {}", missing.join(", "));
    }

    info!("[BOOT] Backend path: {}", config.backend_path.display());
    info!("[BOOT] Background pool size: {}", config.pool_size);

    let daemon = Arc::new(Daemon::new(config));
    server::run(daemon, signals::shutdown_requested()).await?;

    info!("galaxyd stopped");
    Ok(())
}
