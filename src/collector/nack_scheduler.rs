//! Delayed NACK scheduler: coalesces repeated gap detections for the same
//! `(device_id, seq)` and fires a single NACK once the delay has elapsed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A request to schedule (or cancel) a delayed NACK, carried from the
/// receiver to the dedicated NACK worker task over a bounded channel rather
/// than through a scheduler shared as mutable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackRequest {
    /// The device the missing sequence belongs to.
    pub device_id: u8,
    /// The missing sequence number.
    pub seq: u16,
    /// Where to send the NACK frame if it ends up firing.
    pub peer: SocketAddr,
}

/// A message on the receiver → NACK-worker channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackCommand {
    /// A gap was detected; schedule a NACK unless one is already pending.
    Schedule(NackRequest),
    /// The sequence arrived; cancel any NACK pending for it.
    Cancel {
        /// The device whose pending NACK to cancel.
        device_id: u8,
        /// The sequence whose pending NACK to cancel.
        seq: u16,
    },
}

/// A NACK ready to be transmitted: which device, which sequence, and where
/// to send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueNack {
    /// The device the missing sequence belongs to.
    pub device_id: u8,
    /// The missing sequence number.
    pub seq: u16,
    /// Where to send the NACK frame.
    pub peer: SocketAddr,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    peer: SocketAddr,
    due: Instant,
}

/// Counters for NACK scheduling activity, surfaced to the lifecycle log.
#[derive(Debug, Clone, Copy, Default)]
pub struct NackSchedulerStats {
    /// Gap detections that created a new pending entry.
    pub scheduled: u64,
    /// Gap detections that found an entry already pending for the same key.
    pub coalesced: u64,
    /// Entries reaching their due time and handed back to the caller.
    pub fired: u64,
    /// Entries canceled because the sequence arrived before becoming due.
    pub canceled: u64,
}

/// Schedules delayed, coalesced NACK requests.
#[derive(Debug)]
pub struct NackScheduler {
    pending: HashMap<(u8, u16), Pending>,
    delay: Duration,
    stats: NackSchedulerStats,
}

impl NackScheduler {
    /// Create a scheduler with the given delay before a gap becomes a NACK.
    pub fn new(delay: Duration) -> Self {
        NackScheduler {
            pending: HashMap::new(),
            delay,
            stats: NackSchedulerStats::default(),
        }
    }

    /// Schedule a NACK for `(device_id, seq)` to fire `delay` after `now`.
    /// A request already pending for the same key is coalesced (a no-op).
    /// Returns `true` if this created a new pending entry.
    pub fn schedule(&mut self, device_id: u8, seq: u16, peer: SocketAddr, now: Instant) -> bool {
        let key = (device_id, seq);
        if self.pending.contains_key(&key) {
            self.stats.coalesced += 1;
            return false;
        }
        self.pending.insert(
            key,
            Pending {
                peer,
                due: now + self.delay,
            },
        );
        self.stats.scheduled += 1;
        true
    }

    /// Cancel a pending NACK because the sequence has now arrived. Returns
    /// `true` if an entry was actually pending.
    pub fn cancel(&mut self, device_id: u8, seq: u16) -> bool {
        let removed = self.pending.remove(&(device_id, seq)).is_some();
        if removed {
            self.stats.canceled += 1;
        }
        removed
    }

    /// Drain and return every entry whose due time has passed.
    pub fn due_now(&mut self, now: Instant) -> Vec<DueNack> {
        let due_keys: Vec<(u8, u16)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(k, _)| *k)
            .collect();

        let mut out = Vec::with_capacity(due_keys.len());
        for key in due_keys {
            if let Some(p) = self.pending.remove(&key) {
                self.stats.fired += 1;
                out.push(DueNack {
                    device_id: key.0,
                    seq: key.1,
                    peer: p.peer,
                });
            }
        }
        out
    }

    /// Whether a NACK is currently pending for `(device_id, seq)`.
    pub fn is_pending(&self, device_id: u8, seq: u16) -> bool {
        self.pending.contains_key(&(device_id, seq))
    }

    /// Snapshot of scheduling counters.
    pub fn stats(&self) -> NackSchedulerStats {
        self.stats
    }
}
