//! Per-device sender state: sequencing, the data cursor into a preloaded
//! sample stream, and the retransmission history.

use std::collections::HashMap;

use crate::batch;
use crate::error::FrameError;
use crate::frame::{Frame, MsgType};
use crate::keystream;
use crate::units::Unit;

/// Number of samples read per DATA batch (§4.2).
pub const SAMPLES_PER_BATCH: usize = 10;

/// One device's sender-side state: what it has sent, what it still has to
/// send, and everything needed to answer a NACK.
pub struct SenderDeviceState {
    device_id: u8,
    unit: Unit,
    samples: Vec<f64>,
    data_cursor: usize,
    next_seq: u16,
    history: HashMap<u16, Vec<u8>>,
}

impl SenderDeviceState {
    /// Create state for a device, `next_seq` starting at 1 (unsent).
    pub fn new(device_id: u8, unit: Unit, samples: Vec<f64>) -> Self {
        SenderDeviceState {
            device_id,
            unit,
            samples,
            data_cursor: 0,
            next_seq: 1,
            history: HashMap::new(),
        }
    }

    /// Build the INIT frame (seq=1), recording it in history and advancing
    /// `next_seq` to 2.
    pub fn build_init(&mut self) -> Result<Vec<u8>, FrameError> {
        let frame = Frame {
            device_id: self.device_id,
            batch_count: self.unit.to_code(),
            seq: 1,
            timestamp_s: wall_clock_secs(),
            milliseconds: wall_clock_millis(),
            msg_type: MsgType::Init,
            payload: Vec::new(),
        };
        let bytes = frame.build()?;
        self.history.insert(1, bytes.clone());
        self.next_seq = 2;
        Ok(bytes)
    }

    /// Build the next DATA frame: read a fixed chunk of samples (wrapping on
    /// end of stream), encode, obfuscate, frame, record in history, and
    /// advance `next_seq`.
    pub fn build_next_data(&mut self) -> Result<Vec<u8>, FrameError> {
        let chunk = self.read_chunk();
        let encoded = batch::encode(&chunk).map_err(|_| FrameError::FrameTooLarge {
            size: crate::frame::HEADER_LEN + chunk.len() * 8,
        })?;

        let seq = self.next_seq;
        let mut payload = encoded;
        keystream::xor_in_place(&mut payload, self.device_id, seq);

        let frame = Frame {
            device_id: self.device_id,
            batch_count: chunk.len() as u8,
            seq,
            timestamp_s: wall_clock_secs(),
            milliseconds: wall_clock_millis(),
            msg_type: MsgType::Data,
            payload,
        };
        let bytes = frame.build()?;
        self.history.insert(seq, bytes.clone());
        self.next_seq = self.next_seq.wrapping_add(1);
        Ok(bytes)
    }

    /// Build a HEARTBEAT frame. Not recorded in history; not retransmittable.
    pub fn build_heartbeat(&self) -> Result<Vec<u8>, FrameError> {
        let frame = Frame {
            device_id: self.device_id,
            batch_count: 0,
            seq: 0,
            timestamp_s: wall_clock_secs(),
            milliseconds: wall_clock_millis(),
            msg_type: MsgType::Heartbeat,
            payload: Vec::new(),
        };
        frame.build()
    }

    /// Resolve an incoming NACK for `missing_seq` per §4.2:
    /// 1. If it's in history, retransmit verbatim.
    /// 2. Else if `missing_seq == 1`, rebuild and resend INIT, resetting
    ///    sequencing and purging history.
    /// 3. Otherwise, the caller should log inability to satisfy.
    pub fn resolve_nack(&mut self, missing_seq: u16) -> Result<Option<Vec<u8>>, FrameError> {
        if let Some(bytes) = self.history.get(&missing_seq) {
            return Ok(Some(bytes.clone()));
        }
        if missing_seq == 1 {
            self.history.clear();
            self.data_cursor = 0;
            let bytes = self.build_init()?;
            return Ok(Some(bytes));
        }
        Ok(None)
    }

    fn read_chunk(&mut self) -> Vec<f64> {
        let mut chunk = Vec::with_capacity(SAMPLES_PER_BATCH);
        for _ in 0..SAMPLES_PER_BATCH {
            if self.samples.is_empty() {
                break;
            }
            chunk.push(self.samples[self.data_cursor % self.samples.len()]);
            self.data_cursor = (self.data_cursor + 1) % self.samples.len();
        }
        chunk
    }

    /// The device identity this state belongs to.
    pub fn device_id(&self) -> u8 {
        self.device_id
    }
}

fn wall_clock_secs() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn wall_clock_millis() -> u16 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| (d.subsec_millis()) as u16)
        .unwrap_or(0)
}
