//! vmlog-shipper: guest console log shipper
//!
//! Runs next to the VM runtime on a host, follows every guest's raw serial
//! console log and appends structured records to the per-instance log files
//! a container-log collector picks up.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use vmlog_shipper::config::{self, ShipperConfig};
use vmlog_shipper::logging;
use vmlog_shipper::shipper::LogShipper;
use vmlog_shipper::storage::image_name_to_volume_name;
use vmlog_shipper::watcher::TriggerWatcher;

/// Guest console log shipper
#[derive(Parser, Debug)]
#[command(name = "vmlog-shipper", version, about = "Guest console log shipper")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ship logs until SIGINT or SIGTERM
    Run(RunArgs),
    /// Print the volume name an image reference resolves to
    VolumeName {
        /// Image reference, optionally tagged (name[:tag])
        image: String,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// TOML config file (default: $XDG_CONFIG_HOME/vmlog-shipper/config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding one raw log directory per instance
    #[arg(long)]
    raw_root: Option<PathBuf>,

    /// Directory holding one collector log directory per instance
    #[arg(long)]
    output_root: Option<PathBuf>,

    /// Seconds between discovery passes
    #[arg(long)]
    scan_interval_secs: Option<u64>,

    /// Maximum number of concurrently running workers
    #[arg(long)]
    max_workers: Option<usize>,

    /// Directory for this process's own log file (with VMLOG_LOG_FILE=1)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Only scan periodically; do not watch the filesystem
    #[arg(long)]
    no_watch: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::VolumeName { image } => {
            println!("{}", image_name_to_volume_name(&image)?);
            Ok(())
        }
        Command::Run(run) => {
            let _log_guard = logging::init(run.log_dir.as_deref());
            let config = load_config(&run)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("create tokio runtime")?;

            runtime.block_on(run_shipper(config, !run.no_watch))
        }
    }
}

/// Config file (explicit, then default location), then CLI overrides.
fn load_config(run: &RunArgs) -> Result<ShipperConfig> {
    let mut config = match &run.config {
        Some(path) => ShipperConfig::load(path)?,
        None => match config::default_config_path().filter(|p| p.is_file()) {
            Some(path) => ShipperConfig::load(&path)?,
            None => ShipperConfig::default(),
        },
    };

    if let Some(raw_root) = &run.raw_root {
        config.raw_root = raw_root.clone();
    }
    if let Some(output_root) = &run.output_root {
        config.output_root = output_root.clone();
    }
    if let Some(secs) = run.scan_interval_secs {
        config.scan_interval_secs = secs;
    }
    if run.max_workers.is_some() {
        config.max_workers = run.max_workers;
    }

    config.validate()?;
    Ok(config)
}

async fn run_shipper(config: ShipperConfig, watch: bool) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        raw_root = %config.raw_root.display(),
        output_root = %config.output_root.display(),
        "vmlog-shipper starting"
    );

    let (_watcher, mut triggers) = if watch {
        match TriggerWatcher::start(&config) {
            Ok((watcher, rx)) => (Some(watcher), Some(rx)),
            Err(e) => {
                warn!(error = %e, "filesystem watch unavailable; relying on periodic scans");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    let mut ticker = tokio::time::interval(config.scan_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown_timeout = config.shutdown_timeout();

    let shipper = LogShipper::new(config);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
            Some(()) = next_trigger(&mut triggers) => {
                debug!("pass triggered by filesystem change");
            }
        }
        run_pass(&shipper).await;
    }

    info!(workers = shipper.registry().size(), "shutdown requested");
    if tokio::time::timeout(shutdown_timeout, shipper.stop_all_workers())
        .await
        .is_err()
    {
        warn!(
            remaining = shipper.registry().size(),
            "workers did not drain before the shutdown timeout"
        );
    }
    Ok(())
}

async fn run_pass(shipper: &LogShipper) {
    if let Err(e) = shipper.spawn_workers().await {
        warn!(error = %format!("{e:#}"), "discovery pass failed");
    }
    shipper.stop_obsolete_workers().await;
}

async fn next_trigger(triggers: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match triggers {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
