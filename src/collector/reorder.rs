//! Jitter-absorbing reorder buffer keyed by sender timestamp.
//!
//! Holds decoded rows until either a watermark has advanced past them or
//! they've aged out, then releases them in non-decreasing `ts_key_ms` order.

use std::time::{Duration, Instant};

struct Entry<T> {
    ts_key_ms: u64,
    arrival: Instant,
    payload: T,
}

/// A reorder buffer for rows of type `T`, released in sender-timestamp order.
pub struct ReorderBuffer<T> {
    entries: Vec<Entry<T>>,
    max_seen_ts_ms: u64,
    watermark_ms: u64,
    max_age: Duration,
}

impl<T> ReorderBuffer<T> {
    /// Create a buffer with the given watermark and max-age release rules.
    pub fn new(watermark_ms: u64, max_age: Duration) -> Self {
        ReorderBuffer {
            entries: Vec::new(),
            max_seen_ts_ms: 0,
            watermark_ms,
            max_age,
        }
    }

    /// Push a new entry, observed at `arrival` (collector monotonic clock),
    /// keyed by the sender's `ts_key_ms`.
    pub fn push(&mut self, ts_key_ms: u64, arrival: Instant, payload: T) {
        self.max_seen_ts_ms = self.max_seen_ts_ms.max(ts_key_ms);
        self.entries.push(Entry {
            ts_key_ms,
            arrival,
            payload,
        });
    }

    /// Release every entry whose `ts_key_ms` has fallen behind the watermark,
    /// or whose arrival has aged past `max_age`, in non-decreasing
    /// `ts_key_ms` order.
    pub fn release_ready(&mut self, now: Instant) -> Vec<T> {
        let watermark = self.max_seen_ts_ms.saturating_sub(self.watermark_ms);
        let max_age = self.max_age;

        let mut ready_idx = Vec::new();
        for (i, e) in self.entries.iter().enumerate() {
            if e.ts_key_ms <= watermark || now.duration_since(e.arrival) >= max_age {
                ready_idx.push(i);
            }
        }

        let mut released = Vec::with_capacity(ready_idx.len());
        // Remove back-to-front so earlier indices stay valid.
        for &i in ready_idx.iter().rev() {
            released.push(self.entries.remove(i));
        }
        released.sort_by_key(|e| e.ts_key_ms);
        released.into_iter().map(|e| e.payload).collect()
    }

    /// Drain and sort the entire buffer, used on shutdown.
    pub fn drain_all(&mut self) -> Vec<T> {
        let mut entries: Vec<Entry<T>> = self.entries.drain(..).collect();
        entries.sort_by_key(|e| e.ts_key_ms);
        entries.into_iter().map(|e| e.payload).collect()
    }

    /// Number of entries currently buffered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_releases_entries_behind_the_newest_minus_watermark() {
        let mut buf = ReorderBuffer::new(150, Duration::from_millis(1000));
        let t0 = Instant::now();
        buf.push(100, t0, "a");
        buf.push(200, t0, "b");
        buf.push(500, t0, "c"); // max_seen = 500, watermark = 350
        let released = buf.release_ready(t0);
        assert_eq!(released, vec!["a", "b"]);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn age_release_fires_even_without_watermark_advance() {
        let mut buf = ReorderBuffer::new(150, Duration::from_millis(1000));
        let t0 = Instant::now();
        buf.push(100, t0, "a");
        let released = buf.release_ready(t0 + Duration::from_millis(1001));
        assert_eq!(released, vec!["a"]);
    }

    #[test]
    fn release_order_is_non_decreasing_ts_key_even_out_of_arrival_order() {
        let mut buf = ReorderBuffer::new(150, Duration::from_millis(1000));
        let t0 = Instant::now();
        // network delivers 2,3,5,4,6 but ts keys are 200,300,500,400,600
        for (ts, label) in [
            (200, "s2"),
            (300, "s3"),
            (500, "s5"),
            (400, "s4"),
            (600, "s6"),
        ] {
            buf.push(ts, t0, label);
        }
        let released = buf.release_ready(t0);
        // watermark = 600 - 150 = 450, so s2,s3,s4 release (<=450)
        assert_eq!(released, vec!["s2", "s3", "s4"]);
    }

    #[test]
    fn drain_all_returns_everything_sorted() {
        let mut buf = ReorderBuffer::new(150, Duration::from_millis(1000));
        let t0 = Instant::now();
        buf.push(300, t0, "b");
        buf.push(100, t0, "a");
        let drained = buf.drain_all();
        assert_eq!(drained, vec!["a", "b"]);
        assert!(buf.is_empty());
    }
}
