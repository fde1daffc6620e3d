use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use loopwarden::config::Config;
use loopwarden::notifier::Notifier;
use loopwarden::{sniffer, telemetry};

#[derive(Parser)]
#[command(name = "loopwarden")]
#[command(version, about = "Per-host L2 sensor detecting loops, storms and rogue infrastructure")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "configs/config.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error loading config: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&cfg, cli.debug) {
        eprintln!("failed to initialize logging: {e:#}");
        std::process::exit(1);
    }

    if cfg.network.interfaces.is_empty() {
        error!("no interfaces defined in config (network.interfaces = [])");
        std::process::exit(1);
    }

    if cfg.telemetry.enabled {
        if let Err(e) = telemetry::install(&cfg.telemetry.listen_address) {
            warn!("failed to start metrics endpoint: {e:#}");
        }
    }

    let notify = Notifier::start(&cfg.alerts, &cfg.system.sensor_name);

    info!("starting on {} interface(s)", cfg.network.interfaces.len());
    notify.alert(format!(
        "LoopWarden started (monitoring: {:?})",
        cfg.network.interfaces
    ));

    let shutdown = CancellationToken::new();
    let mut stacks = JoinSet::new();

    for iface in cfg.network.interfaces.clone() {
        let cfg = cfg.clone();
        let notify = notify.clone();
        let shutdown = shutdown.clone();
        stacks.spawn(async move {
            info!("[{iface}] launching stack");
            let res = sniffer::run(shutdown, &iface, &cfg, notify).await;
            (iface, res)
        });
    }

    let total = cfg.network.interfaces.len();
    let mut failed = 0usize;

    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("signal received, shutting down stacks");
                break;
            }
            joined = stacks.join_next() => match joined {
                Some(Ok((iface, Err(e)))) => {
                    error!("[{iface}] critical error: {e:#}");
                    notify.alert(format!("Stack failure on {iface}: {e:#}"));
                    failed += 1;
                    if failed == total {
                        error!("every interface stack failed, giving up");
                        std::process::exit(1);
                    }
                }
                Some(Ok((iface, Ok(())))) => {
                    info!("[{iface}] stack stopped");
                }
                Some(Err(e)) => {
                    error!("stack task panicked: {e}");
                }
                None => break,
            }
        }
    }

    shutdown.cancel();
    while let Some(joined) = stacks.join_next().await {
        if let Ok((iface, res)) = joined {
            match res {
                Ok(()) => info!("[{iface}] stack stopped"),
                Err(e) => error!("[{iface}] critical error: {e:#}"),
            }
        }
    }

    notify.alert("LoopWarden stopped gracefully");
    // Let the transport worker drain the final messages
    tokio::time::sleep(Duration::from_millis(250)).await;

    Ok(())
}

fn init_logging(cfg: &Config, debug: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    match cfg.system.log_file.as_str() {
        // Forensically silent sensor
        "/dev/null" => {
            tracing_subscriber::registry().with(EnvFilter::new("off")).init();
        }
        "" => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(false))
                .with(filter)
                .init();
        }
        path => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .with(filter)
                .init();
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
