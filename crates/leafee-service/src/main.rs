//! Leafee Service - keeps Mag contact sensors connected.
//!
//! Run with: `cargo run -p leafee-service`

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use leafee_core::{BleAdapter, BtleplugAdapter};
use leafee_service::{Config, Host, OutputFormat, default_config_path, spawn_renderer};

/// Leafee Service - keeps Mag contact sensors connected and reports their state.
#[derive(Parser, Debug)]
#[command(name = "leafee-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service in the foreground (default behavior).
    Run {
        /// Print entity state as JSON lines instead of log lines.
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration and list the configured sensors.
    Check,

    /// Scan for nearby BLE devices.
    Scan {
        /// Scan duration in seconds.
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing()?;

    match args.command {
        Some(Command::Check) => check(args.config),
        Some(Command::Scan { timeout }) => scan(Duration::from_secs(timeout)).await,
        Some(Command::Run { json }) => run(args.config, json).await,
        None => run(args.config, false).await,
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("leafee_service=info".parse()?)
                .add_directive("leafee_core=info".parse()?),
        )
        .init();
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let config = match &path {
        Some(path) => Config::load(path)?,
        None => {
            info!("Using configuration at {:?}", default_config_path());
            Config::load_default()?
        }
    };
    config.validate()?;
    Ok(config)
}

fn check(path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(path)?;

    println!("Configuration OK ({} sensor(s))", config.sensors.len());
    for sensor in &config.sensors {
        let identity = sensor.identity()?;
        println!(
            "  {} [{}] {} ({})",
            identity.name(),
            identity.device_class(),
            identity.address(),
            identity.unique_id()
        );
    }
    Ok(())
}

async fn scan(duration: Duration) -> anyhow::Result<()> {
    let adapter = BtleplugAdapter::new();
    adapter
        .start(false)
        .await
        .context("Failed to initialize Bluetooth adapter")?;
    let devices = adapter.scan(duration).await?;

    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }

    println!("Found {} device(s):", devices.len());
    for device in &devices {
        let rssi = device
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "N/A".to_string());
        println!(
            "  {}  {:<24} {}",
            device.address,
            device.name.as_deref().unwrap_or("Unknown"),
            rssi
        );
    }
    Ok(())
}

async fn run(path: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let format = if json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let mut host = Host::from_config(&config)?;
    let cancel = host.cancellation_token();
    let renderers: Vec<_> = host
        .sensors()
        .iter()
        .map(|sensor| spawn_renderer(sensor.clone(), format, cancel.clone()))
        .collect();

    host.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    host.shutdown().await;
    for renderer in renderers {
        let _ = renderer.await;
    }
    Ok(())
}
