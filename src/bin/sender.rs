//! `tt-sender` — paces, batches, obfuscates and retransmits one or more
//! devices' readings to a collector.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;
use tracing_subscriber::EnvFilter;

use tinytelemetry::config::{load_config, load_data_stream};
use tinytelemetry::sender::{run, SenderRunConfig};
use tinytelemetry::units::Unit;

/// Send telemetry for one or more configured devices to a collector.
#[derive(Parser, Debug)]
#[command(name = "tt-sender")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Single-device mode: device identity (0-15).
    #[arg(long, conflicts_with = "config")]
    device: Option<u8>,

    /// Single-device mode: unit name (e.g. "celsius", "kelvin").
    #[arg(long, conflicts_with = "config")]
    unit: Option<String>,

    /// Single-device mode: path to the device's data file.
    #[arg(long = "data-file", conflicts_with = "config")]
    data_file: Option<PathBuf>,

    /// Multi-device mode: configuration file mapping devices to units and
    /// data files.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reporting interval in seconds; may repeat to supply an interval list.
    #[arg(long = "interval", required = true)]
    intervals: Vec<u64>,

    /// How long (seconds) each interval in the list is held.
    #[arg(long, default_value_t = 60)]
    duration: u64,

    /// Collector address, e.g. 127.0.0.1:9999.
    #[arg(long)]
    collector: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let devices = if let Some(config_path) = &args.config {
        let descriptors = load_config(config_path)
            .with_context(|| format!("failed to load configuration {:?}", config_path))?;
        let mut devices = Vec::with_capacity(descriptors.len());
        for d in descriptors {
            let samples = load_data_stream(std::path::Path::new(&d.data_file_path), d.device_id)
                .with_context(|| format!("failed to load data file for device {}", d.device_id))?;
            devices.push((d.device_id, d.unit, samples));
        }
        devices
    } else {
        let device_id = args
            .device
            .context("--device is required unless --config is given")?;
        let unit_name = args
            .unit
            .as_deref()
            .context("--unit is required unless --config is given")?;
        let unit = Unit::from_name(unit_name)
            .with_context(|| format!("unknown unit {unit_name:?}"))?;
        let data_file = args
            .data_file
            .context("--data-file is required unless --config is given")?;
        let samples = load_data_stream(&data_file, device_id)
            .with_context(|| format!("failed to load data file {:?}", data_file))?;
        vec![(device_id, unit, samples)]
    };

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("failed to bind sender socket")?;

    let run_config = SenderRunConfig {
        devices,
        intervals_secs: args.intervals,
        duration_secs: args.duration,
        collector_addr: args.collector,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    run(run_config, socket, shutdown_rx)
        .await
        .context("sender run failed")?;

    Ok(())
}
