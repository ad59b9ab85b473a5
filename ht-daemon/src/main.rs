//! Hwtherm Daemon (hwthermd)
//!
//! Runs the thermal zones of one BMC against `/sys/class/hwmon`.
//!
//! # Lifecycle
//! - Load and validate the JSON configuration
//! - Discover hwmon devices and bind sensors and cooling devices
//! - Run one control task per zone until SIGINT or SIGTERM
//! - Log critical escalations; shutdown policy is left to the platform

mod escalation;

use anyhow::Context;
use ht_core::{ThermalConfig, ThermalManager};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_CONFIG_PATH: &str = "/etc/hwtherm/config.json";

const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";

// ============================================================================
// CLI
// ============================================================================

struct Options {
    config: PathBuf,
    snapshot: bool,
}

fn print_help() {
    eprintln!("hwthermd {} - hwmon thermal zone controller", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    hwthermd [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Configuration file (default {})", DEFAULT_CONFIG_PATH);
    eprintln!("    -s, --snapshot      Print one monitoring snapshot as JSON and exit");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    HWTHERM_LOG         Log filter (trace, debug, info, warn, error)");
}

fn print_version() {
    println!("hwthermd {}", VERSION);
}

/// `None` when the process should exit after printing help or version
fn parse_args(args: &[String]) -> anyhow::Result<Option<Options>> {
    let mut options = Options {
        config: PathBuf::from(DEFAULT_CONFIG_PATH),
        snapshot: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "-v" | "--version" => {
                print_version();
                return Ok(None);
            }
            "-s" | "--snapshot" => options.snapshot = true,
            "-c" | "--config" => {
                i += 1;
                let path = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path argument"))?;
                options.config = PathBuf::from(path);
            }
            arg => {
                print_help();
                anyhow::bail!("unknown argument: {}", arg);
            }
        }
        i += 1;
    }
    Ok(Some(options))
}

// ============================================================================
// Setup
// ============================================================================

/// Install the tracing subscriber; returns whether journald is used
fn init_logging() -> bool {
    let log_level = std::env::var("HWTHERM_LOG").unwrap_or_else(|_| "info".to_string());

    if Path::new(JOURNALD_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();
    false
}

/// Hwmon writes need root; reads usually do not
fn check_privileges() {
    // SAFETY: geteuid is always safe - it just returns the process's effective user ID.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        warn!(euid, "Not running as root - cooling writes will likely be denied");
    }
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        _ = terminate.recv() => info!("SIGNAL: Received SIGTERM"),
        result = tokio::signal::ctrl_c() => {
            result.context("installing SIGINT handler")?;
            info!("SIGNAL: Received SIGINT");
        }
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(options) = parse_args(&args)? else {
        return Ok(());
    };

    let journald = init_logging();
    info!("STARTUP: hwthermd {} starting", VERSION);
    info!("STARTUP: Logging to {}", if journald { "systemd journal" } else { "stdout" });
    check_privileges();

    let config = ThermalConfig::load(&options.config)
        .with_context(|| format!("loading configuration from {}", options.config.display()))?;
    info!(
        path = ?options.config,
        zones = config.zones.len(),
        sensors = config.sensors.len(),
        "STARTUP: Configuration loaded"
    );

    let mut manager = ThermalManager::from_config(config)
        .await
        .context("building thermal zones")?;

    if options.snapshot {
        manager.poll_sensors(&ht_core::Cancellation::new()).await;
        let snapshot = manager.snapshot().await.context("taking snapshot")?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let escalations = manager
        .take_alerts()
        .map(|alerts| tokio::spawn(escalation::log_alerts(alerts)));

    manager.start();
    let signal = wait_for_shutdown_signal().await;

    manager.shutdown().await;
    // Zones own the alert senders; dropping them closes the channel
    drop(manager);
    if let Some(task) = escalations {
        match task.await {
            Ok(alerts) if alerts > 0 => warn!(alerts, "SHUTDOWN: Critical alerts were raised this run"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Escalation consumer failed"),
        }
    }

    info!("SHUTDOWN: hwthermd stopped");
    signal
}
