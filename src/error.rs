//! Error taxonomy for the wire codec, configuration loader and journal.
//!
//! Each concern gets its own closed error enum rather than one catch-all type,
//! matching the severity policy in the spec's error handling design: frame
//! errors are non-fatal and drop the frame, configuration errors are fatal at
//! startup.

use thiserror::Error;

/// Failure to build or parse a single frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer than 10 bytes were available where a header was expected.
    #[error("frame too short: got {got} bytes, need at least 10")]
    FrameTooShort {
        /// Number of bytes actually present.
        got: usize,
    },

    /// The header named a `msg_type` or `proto_version` this decoder does not
    /// understand.
    #[error("unsupported frame: proto_version={proto_version}, msg_type={msg_type}")]
    UnsupportedFrame {
        /// Raw 2-bit protocol version field.
        proto_version: u8,
        /// Raw 2-bit message type field.
        msg_type: u8,
    },

    /// The checksum byte did not match the computed checksum.
    #[error("corrupt frame: checksum mismatch, expected {expected}, got {got}")]
    Corrupt {
        /// Checksum computed from the received bytes.
        expected: u8,
        /// Checksum byte carried in the frame.
        got: u8,
    },

    /// A frame (header + payload) would exceed the 200-byte size bound.
    #[error("frame too large: {size} bytes exceeds the 200-byte limit")]
    FrameTooLarge {
        /// The would-be total frame size.
        size: usize,
    },
}

/// Failure to decode a batch payload once the frame itself validated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// The payload ran out of bytes before `batch_count` samples were decoded.
    #[error("payload truncated: needed {needed} more bytes, {available} available")]
    PayloadTruncated {
        /// Bytes still required to finish decoding.
        needed: usize,
        /// Bytes actually remaining in the payload.
        available: usize,
    },

    /// `batch_count` was outside the valid 1..=10 range for a DATA frame.
    #[error("invalid batch count: {0}")]
    InvalidBatchCount(u8),
}

/// Failure to load the configuration file or a device's data file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An I/O error reading the configuration or a data file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A non-blank, non-comment line didn't parse as `device_id,unit_name,path`.
    #[error("malformed configuration line {line_no}: {raw:?}")]
    MalformedLine {
        /// 1-based line number within the configuration file.
        line_no: usize,
        /// The offending line, verbatim.
        raw: String,
    },

    /// The unit name on a configuration line isn't in the closed unit table.
    #[error("unknown unit {name:?} on configuration line {line_no}")]
    UnknownUnit {
        /// 1-based line number within the configuration file.
        line_no: usize,
        /// The unrecognized unit name.
        name: String,
    },

    /// A device's data file produced no numeric samples.
    #[error("device {device_id} has an empty data stream")]
    EmptyDataStream {
        /// The device whose data file was empty.
        device_id: u8,
    },
}

/// Failure to append or rewrite a journal or metrics record.
#[derive(Debug, Error)]
pub enum JournalError {
    /// An I/O error writing or renaming a journal file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A CSV (de)serialization error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}
