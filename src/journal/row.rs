//! Per-reading journal: one CSV row per decoded reading, duplicate-flag
//! post-marking via atomic tempfile+rename rewrite.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::JournalError;

/// One journaled row. Field order is the CSV column order; do not reorder
/// without updating every reader that depends on header position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalRow {
    pub server_timestamp: String,
    pub device_id: u8,
    pub unit_or_batch_count: String,
    pub sequence_number: u16,
    pub device_timestamp: String,
    pub message_type: String,
    pub payload: String,
    pub client_address: String,
    pub delay_seconds: f64,
    pub duplicate_flag: u8,
    pub gap_flag: u8,
    pub packet_size: usize,
    pub cpu_time_ms: f64,
}

/// Append-only per-reading journal with atomic duplicate post-marking.
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// Open (without creating) the journal at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Journal { path: path.into() }
    }

    /// Append one row. Writes the header only if this is the first row ever
    /// written to this file.
    pub fn append(&self, row: &JournalRow) -> Result<(), JournalError> {
        let existed = self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(!existed)
            .from_writer(file);
        writer.serialize(row)?;
        writer.flush()?;
        Ok(())
    }

    /// Set `duplicate_flag = 1` on every previously journaled row matching
    /// `(device_id, sequence_number)`. Rewrites the file via a sibling
    /// tempfile + rename so a crash mid-rewrite never truncates the journal.
    pub fn mark_duplicates(&self, device_id: u8, sequence_number: u16) -> Result<(), JournalError> {
        if !self.path.exists() {
            return Ok(());
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let headers = reader.headers()?.clone();
        let mut rows: Vec<JournalRow> = Vec::new();
        for result in reader.deserialize() {
            let mut row: JournalRow = result?;
            if row.device_id == device_id && row.sequence_number == sequence_number {
                row.duplicate_flag = 1;
            }
            rows.push(row);
        }

        let tmp_path = sibling_tmp_path(&self.path);
        {
            let tmp_file = File::create(&tmp_path)?;
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp_file);
            writer.write_record(headers.iter())?;
            for row in &rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
