//! A compact UDP telemetry protocol: a 10-byte bit-packed frame header, a
//! sender that paces, batches, obfuscates and retransmits readings, and a
//! collector that validates, decodes, deduplicates, reorders and requests
//! retransmission of missing frames.
//!
//! This crate is the shared core used by the `tt-sender` and `tt-collector`
//! binaries (see `src/bin/`): wire framing ([`frame`], [`keystream`],
//! [`batch`]), the [`sender`] and [`collector`] pipelines, row-level
//! [`journal`] persistence, the closed [`units`] table and the
//! configuration file loader ([`config`]).

pub mod batch;
pub mod collector;
pub mod config;
pub mod error;
pub mod frame;
pub mod journal;
pub mod keystream;
pub mod sender;
pub mod units;

pub use error::{BatchError, ConfigError, FrameError, JournalError};
pub use frame::{Frame, MsgType};
pub use units::Unit;
