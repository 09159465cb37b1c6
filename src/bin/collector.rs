//! `tt-collector` — receives, validates, deduplicates, reorders and
//! journals telemetry frames, requesting retransmission of gaps.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing_subscriber::EnvFilter;

use tinytelemetry::collector::{run, CollectorState, NACK_QUEUE_CAPACITY};
use tinytelemetry::journal::MetricsFile;

/// Receive telemetry and persist it, requesting retransmission of gaps.
#[derive(Parser, Debug)]
#[command(name = "tt-collector")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP port to listen on (binds 0.0.0.0:<port>).
    #[arg(long, default_value_t = 9999)]
    listen: u16,

    /// Per-reading journal CSV path.
    #[arg(long, default_value = "iot_device_data.csv")]
    journal: PathBuf,

    /// Aggregate metrics CSV path.
    #[arg(long, default_value = "metrics.csv")]
    metrics: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let bind_addr = format!("0.0.0.0:{}", args.listen);
    let socket = UdpSocket::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(%bind_addr, "collector listening");

    let (nack_tx, nack_rx) = mpsc::channel(NACK_QUEUE_CAPACITY);
    let state = Arc::new(Mutex::new(CollectorState::new(args.journal, nack_tx)));
    let metrics_file = MetricsFile::new(args.metrics);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    run(socket, state, metrics_file, nack_rx, shutdown_rx)
        .await
        .context("collector run failed")?;

    Ok(())
}
