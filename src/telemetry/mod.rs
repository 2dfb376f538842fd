//! # Telemetry Module
//!
//! Holds the authoritative live view of the antenna and records it.
//!
//! This module handles:
//! - Null-safe merging of decoded status frames
//! - Versioned, atomically swapped snapshots for concurrent readers
//! - Connection health (last update within a timeout)
//! - Formatting records as JSONL into rotating files

pub mod merge;
pub mod recorder;
pub mod store;

pub use recorder::TelemetryRecorder;
pub use store::{ConnectionHealth, TelemetryReader, TelemetryRecord, TelemetryStore};
