//! Collector core: receive loop, admission, sequence classification,
//! reorder buffering and journaling, wired together without assuming a real
//! socket so it can be driven directly from tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::batch;
use crate::collector::nack_scheduler::{NackCommand, NackRequest, NackScheduler};
use crate::collector::reorder::ReorderBuffer;
use crate::collector::tracker::{DeviceTracker, SeqOutcome};
use crate::frame::{Frame, MsgType};
use crate::journal::{Journal, JournalRow, MetricsAccumulator, MetricsFile};
use crate::units::Unit;

/// The NACK delay from §5: a gap waits this long before a NACK fires.
pub const NACK_DELAY: Duration = Duration::from_millis(100);
/// Reorder watermark from §5.
pub const REORDER_WATERMARK_MS: u64 = 150;
/// Reorder max age from §5.
pub const REORDER_MAX_AGE: Duration = Duration::from_millis(1000);
/// NACK scheduler tick granularity from §4.3 ("≤ 50 ms").
pub const NACK_TICK: Duration = Duration::from_millis(50);
/// Capacity of the bounded receiver → NACK-worker channel. NACK requests are
/// best-effort, so a full channel is logged and dropped rather than applying
/// backpressure to the receive loop.
pub const NACK_QUEUE_CAPACITY: usize = 256;
/// Fixed device identity the collector uses when it is itself the sender of
/// a frame (currently only NACK frames).
pub const SERVER_DEVICE_ID: u8 = 0;

/// Mutable collector state, shared across the receiver and reorder-flush
/// tasks behind a single [`tokio::sync::Mutex`]. NACK scheduling is
/// deliberately kept out of this struct: gap detection and recovery here
/// only send [`NackCommand`]s across a bounded channel, and a dedicated
/// worker task owns the [`NackScheduler`] itself, taking only a brief
/// read-only lock on this state to confirm a due sequence is still missing.
pub struct CollectorState {
    trackers: HashMap<u8, DeviceTracker>,
    units: HashMap<u8, Unit>,
    nack_tx: mpsc::Sender<NackCommand>,
    reorder: ReorderBuffer<JournalRow>,
    metrics: MetricsAccumulator,
    journal: Journal,
}

/// What came of handling one received datagram, useful for logging and
/// assertions in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The frame failed header/checksum validation; nothing was admitted.
    Rejected,
    /// A DATA frame arrived with no tracker for its device; a NACK for
    /// seq=1 was scheduled and the frame was discarded.
    AdmissionRejected,
    /// The frame was accepted and queued into the reorder buffer.
    Accepted,
}

impl CollectorState {
    /// Create collector state writing to the given journal and metrics
    /// files. `nack_tx` is the sending half of the bounded channel a
    /// dedicated worker task drains to actually schedule and fire NACKs.
    pub fn new(journal_path: impl Into<std::path::PathBuf>, nack_tx: mpsc::Sender<NackCommand>) -> Self {
        CollectorState {
            trackers: HashMap::new(),
            units: HashMap::new(),
            nack_tx,
            reorder: ReorderBuffer::new(REORDER_WATERMARK_MS, REORDER_MAX_AGE),
            metrics: MetricsAccumulator::default(),
            journal: Journal::new(journal_path),
        }
    }

    /// Handle one received datagram. `now_wall` renders the journal's
    /// wall-clock columns.
    pub fn handle_datagram(
        &mut self,
        bytes: &[u8],
        peer: SocketAddr,
        now_wall: chrono::DateTime<Utc>,
    ) -> HandleOutcome {
        let start = Instant::now();
        let frame = match Frame::parse(bytes) {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "dropping unparseable frame");
                return HandleOutcome::Rejected;
            }
        };

        match frame.msg_type {
            MsgType::Init => self.handle_init(&frame, bytes.len(), peer, now_wall, start),
            MsgType::Heartbeat => self.handle_heartbeat(&frame, bytes.len(), peer, now_wall, start),
            MsgType::Data => self.handle_data(&frame, bytes.len(), peer, now_wall, start),
            MsgType::Nack => {
                debug!("collector ignoring unexpected NACK frame");
                HandleOutcome::Rejected
            }
        }
    }

    /// Send a NACK command to the worker task, logging (and dropping) if the
    /// bounded channel is full or the worker has gone away.
    fn send_nack_command(&self, cmd: NackCommand) {
        if let Err(e) = self.nack_tx.try_send(cmd) {
            warn!(error = %e, "failed to enqueue nack command");
        }
    }

    fn handle_init(
        &mut self,
        frame: &Frame,
        byte_len: usize,
        peer: SocketAddr,
        now_wall: chrono::DateTime<Utc>,
        start: Instant,
    ) -> HandleOutcome {
        let unit = Unit::from_code(frame.batch_count);
        self.trackers
            .insert(frame.device_id, DeviceTracker::new_from_init(frame.seq));
        self.units.insert(frame.device_id, unit);

        let row = self.build_row(
            frame,
            byte_len,
            peer,
            now_wall,
            "INIT",
            unit.name().to_string(),
            String::new(),
            0,
            0,
            cpu_ms_since(start),
        );
        self.push_row(frame_ts_key(frame), row);
        self.metrics.packets_received += 1;
        self.metrics.record_other_frame(cpu_ms_since(start));
        info!(device_id = frame.device_id, unit = unit.name(), "device initialized");
        HandleOutcome::Accepted
    }

    fn handle_heartbeat(
        &mut self,
        frame: &Frame,
        byte_len: usize,
        peer: SocketAddr,
        now_wall: chrono::DateTime<Utc>,
        start: Instant,
    ) -> HandleOutcome {
        let unit_label = self
            .units
            .get(&frame.device_id)
            .map(|u| u.name().to_string())
            .unwrap_or_else(|| frame.batch_count.to_string());

        let row = self.build_row(
            frame,
            byte_len,
            peer,
            now_wall,
            "HEARTBEAT",
            unit_label,
            String::new(),
            0,
            0,
            cpu_ms_since(start),
        );
        self.push_row(frame_ts_key(frame), row);
        self.metrics.packets_received += 1;
        self.metrics.record_other_frame(cpu_ms_since(start));
        HandleOutcome::Accepted
    }

    fn handle_data(
        &mut self,
        frame: &Frame,
        byte_len: usize,
        peer: SocketAddr,
        now_wall: chrono::DateTime<Utc>,
        start: Instant,
    ) -> HandleOutcome {
        if !self.trackers.contains_key(&frame.device_id) {
            warn!(
                device_id = frame.device_id,
                "DATA before INIT, scheduling NACK for seq=1"
            );
            self.send_nack_command(NackCommand::Schedule(NackRequest {
                device_id: frame.device_id,
                seq: 1,
                peer,
            }));
            return HandleOutcome::AdmissionRejected;
        }

        let outcome = self
            .trackers
            .get_mut(&frame.device_id)
            .expect("checked above")
            .classify(frame.seq);

        let (gap_flag, duplicate_flag, is_accepted_for_metrics) = match &outcome {
            SeqOutcome::InOrder => {
                self.send_nack_command(NackCommand::Cancel {
                    device_id: frame.device_id,
                    seq: frame.seq,
                });
                (0, 0, true)
            }
            SeqOutcome::Gap { newly_missing } => {
                for &missing in newly_missing {
                    self.send_nack_command(NackCommand::Schedule(NackRequest {
                        device_id: frame.device_id,
                        seq: missing,
                        peer,
                    }));
                }
                self.send_nack_command(NackCommand::Cancel {
                    device_id: frame.device_id,
                    seq: frame.seq,
                });
                self.metrics.sequence_gap_count += newly_missing.len() as u64;
                (1, 0, true)
            }
            SeqOutcome::DuplicateOrRecovered { recovered: true } => {
                self.send_nack_command(NackCommand::Cancel {
                    device_id: frame.device_id,
                    seq: frame.seq,
                });
                (0, 0, true)
            }
            SeqOutcome::DuplicateOrRecovered { recovered: false } => {
                self.journal
                    .mark_duplicates(frame.device_id, frame.seq)
                    .unwrap_or_else(|e| warn!(error = %e, "failed to post-mark duplicates"));
                self.metrics.duplicates += 1;
                (0, 1, false)
            }
        };

        if is_accepted_for_metrics {
            self.metrics.packets_received += 1;
            if let Some(tracker) = self.trackers.get_mut(&frame.device_id) {
                let ts_ms = frame.timestamp_s as u64 * 1000 + frame.milliseconds as u64;
                if let Some(delta) = tracker.note_data_timestamp(ts_ms) {
                    self.metrics.record_interval_sample(delta);
                }
            }
        }

        let mut payload = frame.payload.clone();
        crate::keystream::xor_in_place(&mut payload, frame.device_id, frame.seq);
        let unit_label = self
            .units
            .get(&frame.device_id)
            .map(|u| u.name().to_string())
            .unwrap_or_else(|| frame.batch_count.to_string());

        match batch::decode(&payload, frame.batch_count) {
            Ok(readings) => {
                let cpu_ms = cpu_ms_since(start);
                self.metrics.record_data_frame(byte_len, cpu_ms);
                for value in readings {
                    let row = self.build_row(
                        frame,
                        byte_len,
                        peer,
                        now_wall,
                        "DATA",
                        unit_label.clone(),
                        format!("{value}"),
                        duplicate_flag,
                        gap_flag,
                        cpu_ms,
                    );
                    self.push_row(frame_ts_key(frame), row);
                }
            }
            Err(e) => {
                warn!(error = %e, "batch decode failed, journaling empty payload");
                let cpu_ms = cpu_ms_since(start);
                let row = self.build_row(
                    frame,
                    byte_len,
                    peer,
                    now_wall,
                    "DATA",
                    unit_label,
                    String::new(),
                    duplicate_flag,
                    gap_flag,
                    cpu_ms,
                );
                self.push_row(frame_ts_key(frame), row);
            }
        }

        HandleOutcome::Accepted
    }

    #[allow(clippy::too_many_arguments)]
    fn build_row(
        &self,
        frame: &Frame,
        byte_len: usize,
        peer: SocketAddr,
        now_wall: chrono::DateTime<Utc>,
        message_type: &str,
        unit_or_batch_count: String,
        payload: String,
        duplicate_flag: u8,
        gap_flag: u8,
        cpu_time_ms: f64,
    ) -> JournalRow {
        let device_epoch_ms =
            frame.timestamp_s as f64 * 1000.0 + frame.milliseconds as f64;
        let now_epoch_ms = now_wall.timestamp_millis() as f64;
        let delay_seconds = (now_epoch_ms - device_epoch_ms) / 1000.0;

        let device_ts = chrono::Utc
            .timestamp_opt(frame.timestamp_s as i64, frame.milliseconds as u32 * 1_000_000)
            .single()
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
            .unwrap_or_default();

        JournalRow {
            server_timestamp: now_wall.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            device_id: frame.device_id,
            unit_or_batch_count,
            sequence_number: frame.seq,
            device_timestamp: device_ts,
            message_type: message_type.to_string(),
            payload,
            client_address: peer.to_string(),
            delay_seconds,
            duplicate_flag,
            gap_flag,
            packet_size: byte_len,
            cpu_time_ms,
        }
    }

    fn push_row(&mut self, ts_key_ms: u64, row: JournalRow) {
        self.reorder.push(ts_key_ms, Instant::now(), row);
    }

    /// Release whatever the reorder buffer is ready to emit and journal it.
    pub fn flush_reorder(&mut self, now_mono: Instant) {
        for row in self.reorder.release_ready(now_mono) {
            if let Err(e) = self.journal.append(&row) {
                warn!(error = %e, "failed to append journal row");
            }
        }
    }

    /// Drain everything left in the reorder buffer (shutdown) and journal it
    /// in order.
    pub fn drain_reorder(&mut self) {
        for row in self.reorder.drain_all() {
            if let Err(e) = self.journal.append(&row) {
                warn!(error = %e, "failed to append journal row during drain");
            }
        }
    }

    /// Whether `seq` is still actually missing for `device_id`, the
    /// defense-in-depth check the NACK worker makes before firing a due
    /// request (beyond the scheduler's own cancel-on-arrival bookkeeping).
    pub fn is_still_missing(&self, device_id: u8, seq: u16) -> bool {
        match self.trackers.get(&device_id) {
            Some(t) => t.missing_set.contains(&seq),
            None => seq == 1,
        }
    }

    /// Read-only access to the accumulated metrics counters, for tests and
    /// lifecycle logging.
    pub fn metrics(&self) -> &MetricsAccumulator {
        &self.metrics
    }

    /// Read-only access to a device's tracker, if one exists.
    pub fn tracker(&self, device_id: u8) -> Option<&DeviceTracker> {
        self.trackers.get(&device_id)
    }

    /// Render and append the per-run aggregate metrics record.
    pub fn finish_metrics(&self, metrics_file: &MetricsFile) {
        let record = self.metrics.finish(Utc::now().to_rfc3339());
        if let Err(e) = metrics_file.append(&record) {
            warn!(error = %e, "failed to append metrics record");
        }
    }
}

fn frame_ts_key(frame: &Frame) -> u64 {
    frame.timestamp_s as u64 * 1000 + frame.milliseconds as u64
}

fn cpu_ms_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Build a NACK frame with the collector's fixed server identity.
fn build_nack_frame(device_id: u8, seq: u16) -> Option<Vec<u8>> {
    let payload = format!("{device_id}:{seq}").into_bytes();
    let frame = Frame {
        device_id: SERVER_DEVICE_ID,
        batch_count: 1,
        seq,
        timestamp_s: Utc::now().timestamp() as u32,
        milliseconds: 0,
        msg_type: MsgType::Nack,
        payload,
    };
    frame.build().ok()
}

/// The dedicated NACK worker: owns the [`NackScheduler`] and drains
/// `commands` to schedule/cancel entries, firing due ones on its own tick.
/// Only takes a brief read-only lock on `state` to confirm a due sequence is
/// still actually missing. Exits cooperatively on `shutdown`.
async fn run_nack_worker(
    mut commands: mpsc::Receiver<NackCommand>,
    state: Arc<Mutex<CollectorState>>,
    socket: Arc<UdpSocket>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut scheduler = NackScheduler::new(NACK_DELAY);
    let mut ticker = tokio::time::interval(NACK_TICK);

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(NackCommand::Schedule(req)) => {
                        scheduler.schedule(req.device_id, req.seq, req.peer, Instant::now());
                    }
                    Some(NackCommand::Cancel { device_id, seq }) => {
                        scheduler.cancel(device_id, seq);
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                let due = scheduler.due_now(Instant::now());
                if due.is_empty() {
                    continue;
                }
                let to_send: Vec<(u8, u16, SocketAddr)> = {
                    let guard = state.lock().await;
                    due.into_iter()
                        .filter(|d| guard.is_still_missing(d.device_id, d.seq))
                        .map(|d| (d.device_id, d.seq, d.peer))
                        .collect()
                };
                for (device_id, seq, peer) in to_send {
                    if let Some(bytes) = build_nack_frame(device_id, seq) {
                        if let Err(e) = socket.send_to(&bytes, peer).await {
                            warn!(error = %e, "failed to send NACK");
                        }
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("nack worker shutting down");
                break;
            }
        }
    }
}

/// Periodically releases whatever the reorder buffer is ready to emit, so
/// the max-age rule fires even when no further frames arrive. Exits
/// cooperatively on `shutdown`.
async fn run_reorder_ticker(state: Arc<Mutex<CollectorState>>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(NACK_TICK);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                state.lock().await.flush_reorder(Instant::now());
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Run the collector: bind `socket`, spawn the NACK worker and reorder
/// ticker, and receive until `shutdown` fires. On shutdown, every task
/// finishes its current iteration before the reorder buffer is drained and
/// the aggregate metrics record is written.
pub async fn run(
    socket: UdpSocket,
    state: Arc<Mutex<CollectorState>>,
    metrics_file: MetricsFile,
    nack_commands: mpsc::Receiver<NackCommand>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let socket = Arc::new(socket);

    let nack_worker = tokio::spawn(run_nack_worker(
        nack_commands,
        state.clone(),
        socket.clone(),
        shutdown.resubscribe(),
    ));
    let reorder_ticker = tokio::spawn(run_reorder_ticker(state.clone(), shutdown.resubscribe()));

    let mut buf = [0u8; crate::frame::MAX_FRAME_LEN];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, peer)) => {
                        let now_mono = Instant::now();
                        let now_wall = Utc::now();
                        let mut guard = state.lock().await;
                        guard.handle_datagram(&buf[..len], peer, now_wall);
                        guard.flush_reorder(now_mono);
                    }
                    Err(e) => warn!(error = %e, "recv_from failed"),
                }
            }
            _ = shutdown.recv() => {
                info!("collector shutting down");
                break;
            }
        }
    }

    let _ = nack_worker.await;
    let _ = reorder_ticker.await;

    let mut guard = state.lock().await;
    guard.drain_reorder();
    guard.finish_metrics(&metrics_file);
    Ok(())
}
