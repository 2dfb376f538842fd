//! # Error Types
//!
//! Custom error types for the ACU control core using `thiserror`.
//!
//! Decode errors never leave the link: a bad datagram is logged and dropped.
//! Transport errors schedule a rebind. Tracking errors abort the affected
//! tracker to idle and show up as a status label, never as a panic.

use thiserror::Error;

/// Main error type for the ACU control core
#[derive(Debug, Error)]
pub enum AcuError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors (operator console, telemetry records)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Firmware link errors
    #[error("Link error: {0}")]
    Transport(#[from] TransportError),

    /// Tracking orchestrator errors
    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    /// Pass schedule generation errors
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),
}

/// Reasons an ICD frame is rejected by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Buffer is shorter than the fixed length of its command type
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// Recomputed checksum disagrees with the transmitted one
    #[error("checksum mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    ChecksumMismatch { computed: u16, received: u16 },

    /// Start or end marker is not where the layout puts it
    #[error("framing error: {0}")]
    FramingError(&'static str),

    /// Selector byte(s) name no command this side understands
    #[error("unknown selector 0x{selector:02X}/0x{sub:02X}")]
    UnknownSelector { selector: u8, sub: u8 },
}

/// Firmware link failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// Local endpoint could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Datagram could not be sent
    #[error("failed to send datagram: {0}")]
    Send(#[source] std::io::Error),

    /// The link task is gone; commands can no longer be delivered
    #[error("link command channel closed")]
    ChannelClosed,
}

/// Conditions that abort a tracker back to idle
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackingError {
    /// Axis angle feedback is missing or the firmware link is down
    #[error("axis feedback unavailable: {0}")]
    FeedbackUnavailable(&'static str),

    /// The sun never rises today at this site
    #[error("polar night: sun does not rise today")]
    PolarNight,

    /// No pass with this identifier is cataloged
    #[error("unknown pass id {0}")]
    UnknownPass(u32),

    /// Pass carries no samples to track
    #[error("pass {0} has no samples")]
    EmptyPass(u32),

    /// Tracker is busy; stop it first
    #[error("{0} tracker already active")]
    AlreadyActive(&'static str),

    /// A command could not be handed to the link
    #[error("command not delivered: {0}")]
    CommandRejected(String),
}

/// Pass schedule generation failures
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// TLE text is not two or three non-empty lines
    #[error("invalid TLE format")]
    InvalidTleFormat,

    /// TLE lines failed to parse
    #[error("invalid TLE: {0}")]
    InvalidTle(String),

    /// SGP4 propagation failed
    #[error("propagation error: {0}")]
    Propagation(String),

    /// Requested window is empty or reversed
    #[error("invalid window: {0}")]
    InvalidWindow(String),
}

impl From<sgp4::TleError> for ScheduleError {
    fn from(err: sgp4::TleError) -> Self {
        ScheduleError::InvalidTle(err.to_string())
    }
}

impl From<sgp4::ElementsError> for ScheduleError {
    fn from(err: sgp4::ElementsError) -> Self {
        ScheduleError::Propagation(err.to_string())
    }
}

/// Result type alias for the ACU control core
pub type Result<T> = std::result::Result<T, AcuError>;
