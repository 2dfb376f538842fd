//! # ACU Control Library
//!
//! Control core of an antenna control unit.
//!
//! This library speaks the firmware's binary ICD protocol over UDP, keeps
//! the live telemetry snapshot, and drives scheduled-pass and sun tracking
//! maneuvers through a shared train-first state machine.

pub mod config;
pub mod ephemeris;
pub mod error;
pub mod geometry;
pub mod icd;
pub mod link;
pub mod operator;
pub mod telemetry;
pub mod tracking;
