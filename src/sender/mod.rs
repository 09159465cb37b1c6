//! The sender pipeline: per-device sequencing and history (`state`), plus
//! the three cooperative tasks from §5 — pacer, heartbeat, NACK listener.

pub mod state;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::frame::{Frame, MsgType, MAX_FRAME_LEN};
use state::SenderDeviceState;

/// Heartbeat period from §5.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(10);
/// NACK listener poll timeout from §5.
pub const NACK_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything a sender run needs: the configured devices, the pacing
/// schedule, and where the collector lives.
pub struct SenderRunConfig {
    /// Devices this process sends for, sharing one socket and one NACK
    /// listener.
    pub devices: Vec<(u8, crate::units::Unit, Vec<f64>)>,
    /// Reporting intervals in seconds, applied in order.
    pub intervals_secs: Vec<u64>,
    /// Duration each interval is held, in seconds.
    pub duration_secs: u64,
    /// The collector's address.
    pub collector_addr: SocketAddr,
}

type SharedDevices = Arc<Mutex<HashMap<u8, SenderDeviceState>>>;

/// Run a sender process: send each device's INIT, then race the pacer(s),
/// heartbeat task and NACK listener until `shutdown` fires. Each task
/// subscribes to its own clone of `shutdown` and exits cooperatively at its
/// next suspension point rather than being force-aborted.
pub async fn run(
    config: SenderRunConfig,
    socket: UdpSocket,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let socket = Arc::new(socket);
    let devices: SharedDevices = Arc::new(Mutex::new(HashMap::new()));

    for (device_id, unit, samples) in config.devices {
        let mut state = SenderDeviceState::new(device_id, unit, samples);
        match state.build_init() {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, config.collector_addr).await {
                    warn!(error = %e, device_id, "failed to send INIT");
                }
            }
            Err(e) => warn!(error = %e, device_id, "failed to build INIT"),
        }
        devices.lock().await.insert(device_id, state);
    }

    let device_ids: Vec<u8> = devices.lock().await.keys().copied().collect();

    let mut pacer_handles = Vec::new();
    for device_id in &device_ids {
        let devices = devices.clone();
        let socket = socket.clone();
        let collector_addr = config.collector_addr;
        let intervals = config.intervals_secs.clone();
        let duration_secs = config.duration_secs;
        let device_id = *device_id;
        let shutdown_rx = shutdown.resubscribe();
        pacer_handles.push(tokio::spawn(async move {
            run_pacer(
                devices,
                socket,
                collector_addr,
                device_id,
                intervals,
                duration_secs,
                shutdown_rx,
            )
            .await;
        }));
    }

    let heartbeat = {
        let devices = devices.clone();
        let socket = socket.clone();
        let collector_addr = config.collector_addr;
        let shutdown_rx = shutdown.resubscribe();
        tokio::spawn(async move {
            run_heartbeat(devices, socket, collector_addr, shutdown_rx).await;
        })
    };

    let nack_listener = {
        let devices = devices.clone();
        let socket = socket.clone();
        let shutdown_rx = shutdown.resubscribe();
        tokio::spawn(async move {
            run_nack_listener(devices, socket, shutdown_rx).await;
        })
    };

    let _ = shutdown.recv().await;
    info!("sender shutting down");

    let _ = heartbeat.await;
    let _ = nack_listener.await;
    for h in pacer_handles {
        let _ = h.await;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_pacer(
    devices: SharedDevices,
    socket: Arc<UdpSocket>,
    collector_addr: SocketAddr,
    device_id: u8,
    intervals_secs: Vec<u64>,
    duration_secs: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    'intervals: for interval_secs in intervals_secs {
        let period = Duration::from_secs(interval_secs.max(1));
        let interval_deadline = Instant::now() + Duration::from_secs(duration_secs);
        while Instant::now() < interval_deadline {
            let tick_start = Instant::now();
            let bytes = {
                let mut guard = devices.lock().await;
                guard.get_mut(&device_id).and_then(|s| s.build_next_data().ok())
            };
            if let Some(bytes) = bytes {
                if let Err(e) = socket.send_to(&bytes, collector_addr).await {
                    warn!(error = %e, device_id, "failed to send DATA");
                }
            }
            let elapsed = tick_start.elapsed();
            let remaining = period.saturating_sub(elapsed);
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = shutdown.recv() => break 'intervals,
            }
        }
    }
}

async fn run_heartbeat(
    devices: SharedDevices,
    socket: Arc<UdpSocket>,
    collector_addr: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(HEARTBEAT_PERIOD);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let guard = devices.lock().await;
                for state in guard.values() {
                    match state.build_heartbeat() {
                        Ok(bytes) => {
                            if let Err(e) = socket.send_to(&bytes, collector_addr).await {
                                warn!(error = %e, "failed to send HEARTBEAT");
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to build HEARTBEAT"),
                    }
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

async fn run_nack_listener(devices: SharedDevices, socket: Arc<UdpSocket>, mut shutdown: broadcast::Receiver<()>) {
    let mut buf = [0u8; MAX_FRAME_LEN];
    loop {
        tokio::select! {
            recv = tokio::time::timeout(NACK_POLL_TIMEOUT, socket.recv_from(&mut buf)) => {
                let (len, peer) = match recv {
                    Ok(Ok(pair)) => pair,
                    Ok(Err(e)) => {
                        warn!(error = %e, "nack listener recv failed");
                        continue;
                    }
                    Err(_timeout) => continue,
                };

                let frame = match Frame::parse(&buf[..len]) {
                    Ok(f) if f.msg_type == MsgType::Nack => f,
                    _ => continue,
                };

                let (device_id, missing_seq) = match parse_nack_payload(&frame.payload) {
                    Some(pair) => pair,
                    None => continue,
                };

                let mut guard = devices.lock().await;
                let Some(state) = guard.get_mut(&device_id) else {
                    continue;
                };
                match state.resolve_nack(missing_seq) {
                    Ok(Some(bytes)) => {
                        if let Err(e) = socket.send_to(&bytes, peer).await {
                            warn!(error = %e, device_id, missing_seq, "failed to retransmit");
                        }
                    }
                    Ok(None) => {
                        warn!(device_id, missing_seq, "cannot satisfy NACK, no history");
                    }
                    Err(e) => warn!(error = %e, device_id, missing_seq, "failed to resolve NACK"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

fn parse_nack_payload(payload: &[u8]) -> Option<(u8, u16)> {
    let text = std::str::from_utf8(payload).ok()?;
    let mut parts = text.splitn(2, ':');
    let device_id: u8 = parts.next()?.parse().ok()?;
    let missing_seq: u16 = parts.next()?.parse().ok()?;
    Some((device_id, missing_seq))
}
