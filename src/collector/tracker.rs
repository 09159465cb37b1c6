//! Per-device sequence tracking: distinguishes in-order arrivals, gaps,
//! duplicates and recovered retransmissions.

use std::collections::HashSet;

/// How an incoming sequence number classifies against a device's tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeqOutcome {
    /// `seq == highest_seq + 1`; no gap.
    InOrder,
    /// `seq` jumped ahead of `highest_seq`; every sequence strictly between
    /// them is now missing.
    Gap {
        /// The sequence numbers newly added to `missing_set`.
        newly_missing: Vec<u16>,
    },
    /// `seq <= highest_seq`. `recovered` is true if it filled a gap (was in
    /// `missing_set`), false if it's a plain duplicate.
    DuplicateOrRecovered {
        /// Whether this arrival filled a previously missing sequence.
        recovered: bool,
    },
}

/// Per-device collector state: what has been seen, what's still missing.
#[derive(Debug, Clone)]
pub struct DeviceTracker {
    /// Largest sequence number whose predecessors have all been observed.
    pub highest_seq: u16,
    /// Sequence numbers below `highest_seq` not yet observed.
    pub missing_set: HashSet<u16>,
    /// Most recent sender timestamp (milliseconds) from an accepted DATA.
    pub last_data_ts_ms: Option<u64>,
}

impl DeviceTracker {
    /// Create a tracker for a device whose INIT carried `init_seq` (normally
    /// 1). `highest_seq` starts one below the INIT's own sequence so the
    /// INIT itself is the frame that advances it.
    pub fn new_from_init(init_seq: u16) -> Self {
        DeviceTracker {
            highest_seq: init_seq.saturating_sub(1),
            missing_set: HashSet::new(),
            last_data_ts_ms: None,
        }
    }

    /// Classify an incoming `seq` against this tracker and update its state.
    pub fn classify(&mut self, seq: u16) -> SeqOutcome {
        let diff = seq as i32 - self.highest_seq as i32;
        if diff == 1 {
            self.highest_seq = seq;
            SeqOutcome::InOrder
        } else if diff > 1 {
            let mut newly_missing = Vec::new();
            for m in (self.highest_seq + 1)..seq {
                self.missing_set.insert(m);
                newly_missing.push(m);
            }
            self.highest_seq = seq;
            SeqOutcome::Gap { newly_missing }
        } else {
            let recovered = self.missing_set.remove(&seq);
            SeqOutcome::DuplicateOrRecovered { recovered }
        }
    }

    /// Record the sender timestamp of an accepted DATA frame, returning the
    /// inter-report interval in milliseconds if a previous one exists and
    /// this one is newer.
    pub fn note_data_timestamp(&mut self, ts_ms: u64) -> Option<u64> {
        let interval = match self.last_data_ts_ms {
            Some(prev) if ts_ms > prev => Some(ts_ms - prev),
            _ => None,
        };
        self.last_data_ts_ms = Some(ts_ms);
        interval
    }
}
