//! # Tracking Module
//!
//! Turns operator intent into sequenced axis commands.
//!
//! This module handles:
//! - Pass tables built from the orbit propagator, transform and wrap
//! - The shared train-first state machine and its one-shot action ledger
//! - Scheduled-pass and sun strategies plugged into that machine
//! - The orchestrator that owns both trackers and serves operator requests

pub mod engine;
pub mod machine;
pub mod pass;
pub mod phase;
pub mod scheduled;
pub mod sun;

pub use engine::{
    run_orchestrator, EngineHandle, EngineReply, EngineRequest, Orchestrator, OrchestratorStatus,
};
pub use machine::{Offsets, TrackingSettings};
pub use pass::{Pass, PassCatalog, PassSummary, ScheduleBuilder};
pub use phase::{TrackerStatus, TrackingPhase};
pub use sun::{SunSpeeds, SunStrategy};
