//! End-to-end collector scenarios, driven directly against
//! [`CollectorState::handle_datagram`] so no real socket is needed.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;

use tinytelemetry::batch;
use tinytelemetry::collector::nack_scheduler::{NackCommand, NackScheduler};
use tinytelemetry::collector::receiver::NACK_DELAY;
use tinytelemetry::collector::{CollectorState, HandleOutcome};
use tinytelemetry::frame::{Frame, MsgType};
use tinytelemetry::keystream;
use tinytelemetry::units::Unit;

fn peer() -> SocketAddr {
    "127.0.0.1:4000".parse().unwrap()
}

/// A test-local stand-in for the production NACK worker: drains whatever
/// `NackCommand`s the collector sent since the last drain into `scheduler`,
/// using `now` as the scheduling clock.
fn drain_nack_commands(rx: &mut mpsc::Receiver<NackCommand>, scheduler: &mut NackScheduler, now: Instant) {
    while let Ok(cmd) = rx.try_recv() {
        match cmd {
            NackCommand::Schedule(req) => {
                scheduler.schedule(req.device_id, req.seq, req.peer, now);
            }
            NackCommand::Cancel { device_id, seq } => {
                scheduler.cancel(device_id, seq);
            }
        }
    }
}

/// Due NACKs, filtered the way the production worker filters them: only
/// sequences still actually missing according to the collector's tracker.
fn due_nacks(scheduler: &mut NackScheduler, state: &CollectorState, now: Instant) -> Vec<(u8, u16, SocketAddr)> {
    scheduler
        .due_now(now)
        .into_iter()
        .filter(|d| state.is_still_missing(d.device_id, d.seq))
        .map(|d| (d.device_id, d.seq, d.peer))
        .collect()
}

fn init_frame(device_id: u8, unit: Unit, ts_s: u32) -> Vec<u8> {
    Frame {
        device_id,
        batch_count: unit.to_code(),
        seq: 1,
        timestamp_s: ts_s,
        milliseconds: 0,
        msg_type: MsgType::Init,
        payload: Vec::new(),
    }
    .build()
    .unwrap()
}

fn data_frame(device_id: u8, seq: u16, ts_s: u32, ms: u16, samples: &[f64]) -> Vec<u8> {
    let mut payload = batch::encode(samples).unwrap();
    keystream::xor_in_place(&mut payload, device_id, seq);
    Frame {
        device_id,
        batch_count: samples.len() as u8,
        seq,
        timestamp_s: ts_s,
        milliseconds: ms,
        msg_type: MsgType::Data,
        payload,
    }
    .build()
    .unwrap()
}

fn journal_rows(path: &std::path::Path) -> Vec<tinytelemetry::journal::JournalRow> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.deserialize().map(|r| r.unwrap()).collect()
}

#[test]
fn happy_path_journals_every_reading_with_clean_flags() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("journal.csv");
    let (nack_tx, _nack_rx) = mpsc::channel(32);
    let mut state = CollectorState::new(&journal_path, nack_tx);

    let now_wall = Utc::now();

    state.handle_datagram(&init_frame(1, Unit::Kelvin, 100), peer(), now_wall);
    for (i, seq) in (2u16..=6).enumerate() {
        let bytes = data_frame(1, seq, 100 + i as u32 + 1, 0, &[1.0; 10]);
        let outcome = state.handle_datagram(&bytes, peer(), now_wall);
        assert_eq!(outcome, HandleOutcome::Accepted);
    }
    state.drain_reorder();

    let rows = journal_rows(&journal_path);
    let data_rows: Vec<_> = rows.iter().filter(|r| r.message_type == "DATA").collect();
    assert_eq!(data_rows.len(), 50);
    assert!(data_rows.iter().all(|r| r.gap_flag == 0 && r.duplicate_flag == 0));

    let metrics = state.metrics();
    assert_eq!(metrics.packets_received, 6);
    assert_eq!(metrics.duplicates, 0);
    assert_eq!(metrics.sequence_gap_count, 0);
}

#[test]
fn single_loss_triggers_nack_and_recovers_on_retransmit() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("journal.csv");
    let (nack_tx, mut nack_rx) = mpsc::channel(32);
    let mut scheduler = NackScheduler::new(NACK_DELAY);
    let mut state = CollectorState::new(&journal_path, nack_tx);

    let now_mono = Instant::now();
    let now_wall = Utc::now();

    state.handle_datagram(&init_frame(1, Unit::Kelvin, 100), peer(), now_wall);
    state.handle_datagram(&data_frame(1, 2, 101, 0, &[1.0]), peer(), now_wall);
    state.handle_datagram(&data_frame(1, 3, 102, 0, &[1.0]), peer(), now_wall);
    // seq 4 dropped by the network.
    let outcome = state.handle_datagram(&data_frame(1, 5, 104, 0, &[1.0]), peer(), now_wall);
    assert_eq!(outcome, HandleOutcome::Accepted);

    drain_nack_commands(&mut nack_rx, &mut scheduler, now_mono);

    assert_eq!(state.tracker(1).unwrap().missing_set.len(), 1);
    assert!(state.tracker(1).unwrap().missing_set.contains(&4));

    // Not yet due.
    assert!(due_nacks(&mut scheduler, &state, now_mono).is_empty());
    let past_due = now_mono + Duration::from_millis(150);
    let due = due_nacks(&mut scheduler, &state, past_due);
    assert_eq!(due, vec![(1, 4, peer())]);

    // Sender retransmits the missing frame.
    let retransmit = data_frame(1, 4, 103, 0, &[1.0]);
    state.handle_datagram(&retransmit, peer(), now_wall);
    state.handle_datagram(&data_frame(1, 6, 105, 0, &[1.0]), peer(), now_wall);
    drain_nack_commands(&mut nack_rx, &mut scheduler, past_due);

    assert!(state.tracker(1).unwrap().missing_set.is_empty());
    let metrics = state.metrics();
    assert_eq!(metrics.sequence_gap_count, 1);
    assert_eq!(metrics.duplicates, 0);
}

#[test]
fn duplicate_data_marks_duplicate_flag_on_prior_rows() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("journal.csv");
    let (nack_tx, _nack_rx) = mpsc::channel(32);
    let mut state = CollectorState::new(&journal_path, nack_tx);

    let now_wall = Utc::now();

    state.handle_datagram(&init_frame(1, Unit::Kelvin, 100), peer(), now_wall);
    state.handle_datagram(&data_frame(1, 2, 101, 0, &[1.0]), peer(), now_wall);
    state.handle_datagram(&data_frame(1, 3, 102, 0, &[1.0]), peer(), now_wall);
    // Flush so the original seq=3 row is actually on disk before it gets
    // retroactively marked.
    state.drain_reorder();

    let outcome = state.handle_datagram(&data_frame(1, 3, 102, 0, &[1.0]), peer(), now_wall);
    assert_eq!(outcome, HandleOutcome::Accepted);
    state.drain_reorder();

    let rows = journal_rows(&journal_path);
    let seq3_rows: Vec<_> = rows.iter().filter(|r| r.sequence_number == 3).collect();
    assert_eq!(seq3_rows.len(), 2);
    assert!(seq3_rows.iter().all(|r| r.duplicate_flag == 1));

    let metrics = state.metrics();
    assert_eq!(metrics.duplicates, 1);
    assert_eq!(metrics.packets_received, 3); // init + seq2 + seq3 (first arrival only)
}

#[test]
fn reorder_buffer_releases_in_sender_timestamp_order() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("journal.csv");
    let (nack_tx, _nack_rx) = mpsc::channel(32);
    let mut state = CollectorState::new(&journal_path, nack_tx);

    let now_wall = Utc::now();

    state.handle_datagram(&init_frame(1, Unit::Kelvin, 0), peer(), now_wall);
    // Sender emitted seq 2..6 at ts 100,200,300,400,500ms; network delivers
    // 2,3,5,4,6.
    for (seq, ms) in [(2u16, 100u16), (3, 200), (5, 500), (4, 400), (6, 600)] {
        state.handle_datagram(&data_frame(1, seq, 0, ms, &[seq as f64]), peer(), now_wall);
    }
    state.drain_reorder();

    let rows = journal_rows(&journal_path);
    let data_seqs: Vec<u16> = rows
        .iter()
        .filter(|r| r.message_type == "DATA")
        .map(|r| r.sequence_number)
        .collect();
    assert_eq!(data_seqs, vec![2, 3, 4, 5, 6]);
}

#[test]
fn data_before_init_is_discarded_and_schedules_nack_for_seq_one() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("journal.csv");
    let (nack_tx, mut nack_rx) = mpsc::channel(32);
    let mut scheduler = NackScheduler::new(NACK_DELAY);
    let mut state = CollectorState::new(&journal_path, nack_tx);

    let now_mono = Instant::now();
    let now_wall = Utc::now();

    let outcome = state.handle_datagram(&data_frame(9, 7, 100, 0, &[1.0]), peer(), now_wall);
    assert_eq!(outcome, HandleOutcome::AdmissionRejected);
    assert!(state.tracker(9).is_none());

    drain_nack_commands(&mut nack_rx, &mut scheduler, now_mono);
    let due = due_nacks(&mut scheduler, &state, now_mono + Duration::from_millis(150));
    assert_eq!(due, vec![(9, 1, peer())]);

    state.drain_reorder();
    assert!(!journal_path.exists());
}

#[test]
fn corrupted_frame_is_dropped_without_touching_tracker_state() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("journal.csv");
    let (nack_tx, _nack_rx) = mpsc::channel(32);
    let mut state = CollectorState::new(&journal_path, nack_tx);

    let now_wall = Utc::now();

    state.handle_datagram(&init_frame(1, Unit::Kelvin, 100), peer(), now_wall);
    state.handle_datagram(&data_frame(1, 2, 101, 0, &[1.0]), peer(), now_wall);

    let mut corrupted = data_frame(1, 3, 102, 0, &[1.0]);
    let payload_start = tinytelemetry::frame::HEADER_LEN;
    corrupted[payload_start] ^= 0xFF;

    let outcome = state.handle_datagram(&corrupted, peer(), now_wall);
    assert_eq!(outcome, HandleOutcome::Rejected);
    assert_eq!(state.tracker(1).unwrap().highest_seq, 2);
}
