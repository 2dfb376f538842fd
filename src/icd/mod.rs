//! # ICD Protocol Module
//!
//! Implementation of the antenna firmware's binary interface (the "ICD").
//!
//! This module handles:
//! - Fixed-layout command encoding (status poll, stops, moves, offsets, feeds)
//! - The three-message satellite-track sequence
//! - Status response decoding into a nullable [`status::StatusSnapshot`]
//! - CRC-16/CCITT frame checksums and start/end marker validation
//!
//! Encoding and decoding are pure: no I/O and no state.

pub mod protocol;
pub mod status;
pub mod encoder;
pub mod decoder;
pub mod checksum;

pub use decoder::decode;
pub use encoder::encode;
pub use protocol::{Command, Frame};
