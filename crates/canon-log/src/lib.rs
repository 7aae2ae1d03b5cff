//! Canon Log - Ordered undo/redo log
//!
//! This crate implements the log every container drives:
//! - Actions keyed by a totally ordered key
//! - Rewind of later actions when an earlier one arrives
//! - Replay in ascending key order
//! - A soft horizon below which entries are settled and pruned

pub mod repo;

pub use repo::*;
