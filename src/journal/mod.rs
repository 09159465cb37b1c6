//! Row-level persistence: the per-reading journal and the per-run aggregate
//! metrics record.

pub mod metrics;
pub mod row;

pub use metrics::{MetricsAccumulator, MetricsFile, MetricsRecord};
pub use row::{Journal, JournalRow};
