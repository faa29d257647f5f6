//! vtswitchd - session daemon that repaints a DPMS-corrupted display by
//! switching virtual terminals on screen lock.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vtswitchd::actuator::ShellActuator;
use vtswitchd::config::Config;
use vtswitchd::probe::{ShellProbes, SystemProbes};
use vtswitchd::screensaver::ScreenSaver;
use vtswitchd::switcher::Switcher;

/// Repaints a DPMS-corrupted display by switching virtual terminals when the
/// screen locks.
#[derive(Parser, Debug)]
#[command(name = "vtswitchd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log terminal-switch and power-off commands instead of executing them.
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run every probe once, print the results, and exit.
    #[arg(long)]
    probe: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("vtswitchd v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;

    if args.dry_run {
        config.dry_run = true;
    }

    info!(
        "Configuration loaded (service={}, dry_run={})",
        config.service, config.dry_run
    );

    if args.probe {
        return run_probe(&config).await;
    }

    run_daemon(config).await
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("vtswitchd={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Run each probe once and print the results.
async fn run_probe(config: &Config) -> Result<()> {
    let screensaver = ScreenSaver::connect(config)
        .await
        .context("Failed to connect to the session bus")?;
    let probes = ShellProbes::from_config(config);

    match screensaver.get_active().await {
        Ok(locked) => println!("locked: {locked}"),
        Err(err) => println!("locked: unavailable ({err})"),
    }

    match probes.monitor_power().await {
        Ok(power) => println!("monitor: {power:?}"),
        Err(err) => println!("monitor: unavailable ({err})"),
    }

    match tokio::try_join!(probes.idle_threshold(), probes.idle_duration()) {
        Ok((threshold, idle)) => {
            println!("idle threshold: {threshold}s");
            println!("idle duration: {idle}s");
            let delay = if threshold > idle {
                threshold - idle
            } else {
                config.recheck_cushion_seconds
            };
            println!("recheck delay: {delay}s");
        }
        Err(err) => println!("idle probes failed: {err}"),
    }

    Ok(())
}

/// Run the daemon event loop.
async fn run_daemon(config: Config) -> Result<()> {
    let screensaver = Arc::new(
        ScreenSaver::connect(&config)
            .await
            .context("Failed to connect to the session bus")?,
    );
    let probes = Arc::new(ShellProbes::from_config(&config));
    let actuator = Arc::new(ShellActuator::from_config(&config));
    let switcher = Arc::new(Switcher::new(
        &config,
        Arc::clone(&screensaver),
        probes,
        actuator,
    ));

    let mut events = screensaver
        .active_changed()
        .await
        .context("Failed to subscribe to lock notifications")?;

    info!(
        "Daemon started, waiting for lock events on {}",
        config.interface
    );

    loop {
        tokio::select! {
            signal = events.next() => {
                match signal {
                    Some(message) => match message.body().deserialize::<bool>() {
                        Ok(locked) => {
                            Arc::clone(&switcher).screen_lock_changed(locked).await;
                        }
                        Err(err) => warn!("could not read ActiveChanged payload: {err}"),
                    },
                    None => {
                        warn!("lock notification stream ended");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                switcher.cancel_pending_recheck().await;
                break;
            }
        }
    }

    Ok(())
}
