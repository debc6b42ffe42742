//! Run Monitoring Module
//!
//! Aggregates lifecycle events into per-run counts and timings.

pub mod statistics;

pub use statistics::{ActionTiming, StatisticsSnapshot, WorkflowStatistics};
