#![warn(missing_docs)]
//! Herald batches raw notification events into per-target digests, delivered on
//! a minimum-delay schedule, and evaluates monitor check-ins to decide when a
//! monitored process has recovered.

pub mod config;
pub mod digests;
pub mod models;
pub mod monitors;
pub mod notification;
pub mod persistence;
pub mod queue;
pub mod test_helpers;
