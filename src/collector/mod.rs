//! The collector pipeline: receive, validate, track sequences, schedule
//! NACKs, reorder, and journal.

pub mod nack_scheduler;
pub mod receiver;
pub mod reorder;
pub mod tracker;

pub use nack_scheduler::{NackCommand, NackRequest};
pub use receiver::{run, CollectorState, HandleOutcome, NACK_QUEUE_CAPACITY};
