use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use runlights::config::{self, Loaded};
use runlights::daemon::{Daemon, Outcome};
use runlights::dispatch::WledTransport;
use runlights::logging::{self, LoggingGuard, LOG_FILE_NAME};
use runlights::model::Config;
use runlights::paths;
use runlights::process_monitor::SysinfoLister;

#[derive(Parser, Debug)]
#[command(name = "runlights", version, about = "Process-driven lighting engine")]
struct Cli {
    /// Config file to use instead of the per-user default.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = match cli.config {
        Some(path) => path,
        None => paths::config_file_path()?,
    };
    let loaded = config::load_or_default(&config_path);
    let debug = loaded.as_ref().is_ok_and(|l| l.config.debug_on_start);

    // ── Logging ───────────────────────────────────────────────────────────────
    let _log_guard = match start_logging(debug) {
        Ok(guard) => Some(guard),
        Err(e) => {
            logging::init_stderr_logging(logging::default_directive(debug));
            warn!("File logging unavailable: {e:#}");
            None
        }
    };
    info!("RunLights v{} starting", env!("CARGO_PKG_VERSION"));

    // Loader problems are reported once; the engine runs on whatever survived.
    let config = match loaded {
        Ok(Loaded { config, issues }) => {
            for issue in &issues {
                warn!("[config] {issue}");
            }
            info!(path = %config_path.display(), "[config] Loaded");
            config
        }
        Err(e) => {
            error!("[config] {e:#}; continuing with an empty configuration");
            Config::default()
        }
    };
    if config.controllers.is_empty() {
        warn!("[config] No controllers configured; lighting is disabled");
    }
    let config = Arc::new(config);

    // ── Capabilities ──────────────────────────────────────────────────────────
    let transport = WledTransport::new(Duration::from_millis(config.request_timeout_ms))
        .context("Failed to create HTTP client")?;
    let lister = SysinfoLister::new();

    // Graceful shutdown on Ctrl+C.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let daemon = Daemon::new(config, transport, lister)
        .with_status_file(paths::status_file_path(&config_path));
    match daemon.run(shutdown_rx).await? {
        Outcome::Stopped => info!("RunLights stopped"),
        // The running instance keeps the lights; this one just leaves.
        Outcome::AlreadyRunning => {}
    }
    Ok(())
}

fn start_logging(debug: bool) -> anyhow::Result<LoggingGuard> {
    let dir = paths::log_dir()?;
    logging::init_logging(&dir, LOG_FILE_NAME, debug)
        .with_context(|| format!("Failed to prepare log directory {}", dir.display()))
}
