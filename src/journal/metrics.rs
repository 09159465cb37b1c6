//! Per-run aggregate metrics record, appended to `metrics.csv` with the
//! header written only if the file doesn't already exist.

use std::fs::OpenOptions;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::JournalError;

/// One row of the aggregate metrics file, written once at collector
/// shutdown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsRecord {
    pub packets_received: u64,
    pub bytes_per_report: f64,
    pub duplicate_rate: f64,
    pub sequence_gap_count: u64,
    pub cpu_ms_per_report: f64,
    pub reporting_interval_ms: f64,
    pub finished_at: String,
}

/// Accumulates the counters needed to build a [`MetricsRecord`] across a
/// collector run, then renders and appends it on shutdown.
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    /// Accepted frames, excluding discarded corrupt or duplicate ones.
    pub packets_received: u64,
    /// Raw datagram byte lengths, one per accepted DATA frame.
    data_byte_lengths: Vec<usize>,
    /// Count of duplicate DATA frames.
    pub duplicates: u64,
    /// Total missing sequence numbers observed across all devices.
    pub sequence_gap_count: u64,
    /// Handler CPU cost in milliseconds, one per accepted frame.
    cpu_ms_samples: Vec<f64>,
    /// Inter-DATA arrival deltas in milliseconds, per §4.3.
    interval_samples_ms: Vec<u64>,
}

impl MetricsAccumulator {
    /// Record one accepted DATA frame's raw byte length and handler cost.
    pub fn record_data_frame(&mut self, byte_len: usize, cpu_ms: f64) {
        self.data_byte_lengths.push(byte_len);
        self.cpu_ms_samples.push(cpu_ms);
    }

    /// Record a non-DATA accepted frame's handler cost (no byte-length
    /// contribution to `bytes_per_report`, which is DATA-only per §4.4).
    pub fn record_other_frame(&mut self, cpu_ms: f64) {
        self.cpu_ms_samples.push(cpu_ms);
    }

    /// Record an inter-DATA interval sample (§4.3).
    pub fn record_interval_sample(&mut self, delta_ms: u64) {
        self.interval_samples_ms.push(delta_ms);
    }

    /// Render the accumulated counters into a [`MetricsRecord`].
    pub fn finish(&self, finished_at: String) -> MetricsRecord {
        let bytes_per_report = mean(&self.data_byte_lengths.iter().map(|&b| b as f64).collect::<Vec<_>>());
        let duplicate_rate = if self.packets_received == 0 {
            0.0
        } else {
            self.duplicates as f64 / self.packets_received as f64
        };
        let cpu_ms_per_report = mean(&self.cpu_ms_samples);
        let reporting_interval_ms = median(&mut self.interval_samples_ms.iter().map(|&v| v as f64).collect::<Vec<_>>());

        MetricsRecord {
            packets_received: self.packets_received,
            bytes_per_report,
            duplicate_rate,
            sequence_gap_count: self.sequence_gap_count,
            cpu_ms_per_report,
            reporting_interval_ms,
            finished_at,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Append-only metrics file: one [`MetricsRecord`] row per run.
pub struct MetricsFile {
    path: PathBuf,
}

impl MetricsFile {
    /// Open (without creating) the metrics file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        MetricsFile { path: path.into() }
    }

    /// Append `record`, writing the header first only if the file is new.
    pub fn append(&self, record: &MetricsRecord) -> Result<(), JournalError> {
        let existed = self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(!existed)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_computes_mean_duplicate_rate_and_median_interval() {
        let mut acc = MetricsAccumulator::default();
        acc.packets_received = 4;
        acc.duplicates = 1;
        acc.sequence_gap_count = 2;
        acc.record_data_frame(50, 1.0);
        acc.record_data_frame(60, 2.0);
        acc.record_interval_sample(1000);
        acc.record_interval_sample(1100);
        acc.record_interval_sample(900);

        let record = acc.finish("2026-07-27T00:00:00Z".into());
        assert_eq!(record.packets_received, 4);
        assert!((record.bytes_per_report - 55.0).abs() < 1e-9);
        assert!((record.duplicate_rate - 0.25).abs() < 1e-9);
        assert_eq!(record.sequence_gap_count, 2);
        assert!((record.cpu_ms_per_report - 1.5).abs() < 1e-9);
        assert!((record.reporting_interval_ms - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn empty_accumulator_yields_zeros_not_nan() {
        let acc = MetricsAccumulator::default();
        let record = acc.finish("2026-07-27T00:00:00Z".into());
        assert_eq!(record.bytes_per_report, 0.0);
        assert_eq!(record.duplicate_rate, 0.0);
        assert_eq!(record.cpu_ms_per_report, 0.0);
        assert_eq!(record.reporting_interval_ms, 0.0);
    }

    #[test]
    fn append_writes_header_only_for_first_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        let metrics = MetricsFile::new(&path);
        let acc = MetricsAccumulator::default();
        let record = acc.finish("2026-07-27T00:00:00Z".into());
        metrics.append(&record).unwrap();
        metrics.append(&record).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let header_count = contents
            .lines()
            .filter(|l| l.starts_with("packets_received"))
            .count();
        assert_eq!(header_count, 1);
        assert_eq!(contents.lines().count(), 3);
    }
}
