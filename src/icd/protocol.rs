//! # ICD Protocol Constants and Types
//!
//! Core protocol definitions for the antenna firmware ICD.
//!
//! Frame structure: `STX(1) + selector(1..2) + payload(N) + checksum(2) + ETX(1)`.
//! Every command type has a fixed frame length; multi-byte numbers are
//! big-endian.

use serde::{Deserialize, Serialize};

use super::checksum::crc16_ccitt;
use super::status::StatusSnapshot;

/// Frame start marker
pub const ICD_STX: u8 = 0x02;

/// Frame end marker
pub const ICD_ETX: u8 = 0x03;

/// Bytes every frame spends on framing: STX + checksum + ETX
pub const ICD_FRAMING_OVERHEAD: usize = 4;

/// Smallest possible frame: STX + selector + checksum + ETX
pub const ICD_MIN_FRAME_LEN: usize = 5;

/// Read-status request and status response share this selector
pub const SEL_STATUS: u8 = 0x10;
pub const SEL_EMERGENCY_STOP: u8 = 0x11;
pub const SEL_AXIS_STOP: u8 = 0x12;
pub const SEL_STANDBY: u8 = 0x13;
pub const SEL_MANUAL_MOVE: u8 = 0x14;
pub const SEL_FEED: u8 = 0x15;
pub const SEL_POSITION_OFFSET: u8 = 0x16;
pub const SEL_TIME_OFFSET: u8 = 0x17;
pub const SEL_ENCODER_PRESET: u8 = 0x18;
pub const SEL_ALARM_RESET: u8 = 0x19;

/// Satellite-track family; the second byte picks the message
pub const SEL_SAT_TRACK: u8 = 0x20;
pub const SUB_SAT_TRACK_HEADER: u8 = 0x01;
pub const SUB_SAT_TRACK_INITIAL: u8 = 0x02;
pub const SUB_SAT_TRACK_REQUEST: u8 = 0x03;
pub const SUB_SAT_TRACK_DATA: u8 = 0x04;

/// Fixed frame lengths per command type
pub const LEN_READ_STATUS: usize = 5;
pub const LEN_STATUS_RESPONSE: usize = 172;
pub const LEN_EMERGENCY_STOP: usize = 6;
pub const LEN_AXIS_STOP: usize = 6;
pub const LEN_STANDBY: usize = 5;
pub const LEN_MANUAL_MOVE: usize = 30;
pub const LEN_FEED: usize = 7;
pub const LEN_POSITION_OFFSET: usize = 18;
pub const LEN_TIME_OFFSET: usize = 9;
pub const LEN_ENCODER_PRESET: usize = 10;
pub const LEN_ALARM_RESET: usize = 6;
pub const LEN_SAT_TRACK_HEADER: usize = 18;
pub const LEN_SAT_TRACK_INITIAL: usize = 420;
pub const LEN_SAT_TRACK_REQUEST: usize = 10;
pub const LEN_SAT_TRACK_DATA: usize = 412;

/// Point slots carried by one satellite-track block
pub const SAT_TRACK_BLOCK_POINTS: usize = 50;

/// Time step between consecutive satellite-track points
pub const SAT_TRACK_STEP_MS: u16 = 100;

/// Spare bytes at the tail of the status block
pub const STATUS_SPARE_BYTES: usize = 32;

/// Axis selector bit-vector (bit0 azimuth, bit1 elevation, bit2 train)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxisMask(pub u8);

impl AxisMask {
    pub const NONE: AxisMask = AxisMask(0x00);
    pub const AZIMUTH: AxisMask = AxisMask(0x01);
    pub const ELEVATION: AxisMask = AxisMask(0x02);
    pub const TRAIN: AxisMask = AxisMask(0x04);
    pub const AZ_EL: AxisMask = AxisMask(0x03);
    pub const ALL: AxisMask = AxisMask(0x07);

    /// True if every bit of `other` is set in `self`
    #[must_use]
    pub fn contains(self, other: AxisMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for AxisMask {
    type Output = AxisMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        AxisMask(self.0 | rhs.0)
    }
}

/// Feed band bit-vector (bit0 S, bit1 X, bit2 Ka)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BandMask(pub u8);

impl BandMask {
    pub const S: BandMask = BandMask(0x01);
    pub const X: BandMask = BandMask(0x02);
    pub const KA: BandMask = BandMask(0x04);
    pub const ALL: BandMask = BandMask(0x07);
}

/// Target angle and slew speed for one axis, in degrees and degrees/second
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisMotion {
    pub angle: f32,
    pub speed: f32,
}

impl AxisMotion {
    #[must_use]
    pub fn new(angle: f32, speed: f32) -> Self {
        Self { angle, speed }
    }
}

/// Multi-axis manual move; only axes set in `axes` are driven
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ManualMove {
    pub axes: AxisMask,
    pub azimuth: AxisMotion,
    pub elevation: AxisMotion,
    pub train: AxisMotion,
}

/// One satellite-track sample as the firmware wants it: elevation first
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackPoint {
    pub elevation: f32,
    pub azimuth: f32,
}

/// Announces a program track: AOS/LOS and how many points will follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatTrackHeader {
    pub aos_unix_s: u32,
    pub los_unix_s: u32,
    pub total_points: u16,
    pub step_ms: u16,
}

/// Starts a program track with the first block of points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatTrackInitial {
    pub ntp_seconds: u32,
    pub ntp_fraction: u32,
    pub time_offset_s: f32,
    /// At most [`SAT_TRACK_BLOCK_POINTS`] points
    pub points: Vec<TrackPoint>,
}

/// Answers a firmware pull request with the block starting at `elapsed_ms`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatTrackBlock {
    pub elapsed_ms: u32,
    /// At most [`SAT_TRACK_BLOCK_POINTS`] points
    pub points: Vec<TrackPoint>,
}

/// Commands the ACU sends to the firmware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    ReadStatus,
    EmergencyStop { engage: bool },
    AxisStop { axes: AxisMask },
    Standby,
    ManualMove(ManualMove),
    Feed { bands: BandMask, on: bool },
    PositionOffset {
        axes: AxisMask,
        azimuth: f32,
        elevation: f32,
        train: f32,
    },
    TimeOffset { seconds: f32 },
    EncoderPreset { axes: AxisMask, angle: f32 },
    AlarmReset { axes: AxisMask },
    SatTrackHeader(SatTrackHeader),
    SatTrackInitial(SatTrackInitial),
    SatTrackData(SatTrackBlock),
}

impl Command {
    /// Short name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Command::ReadStatus => "read_status",
            Command::EmergencyStop { .. } => "emergency_stop",
            Command::AxisStop { .. } => "axis_stop",
            Command::Standby => "standby",
            Command::ManualMove(_) => "manual_move",
            Command::Feed { .. } => "feed",
            Command::PositionOffset { .. } => "position_offset",
            Command::TimeOffset { .. } => "time_offset",
            Command::EncoderPreset { .. } => "encoder_preset",
            Command::AlarmReset { .. } => "alarm_reset",
            Command::SatTrackHeader(_) => "sat_track_header",
            Command::SatTrackInitial(_) => "sat_track_initial",
            Command::SatTrackData(_) => "sat_track_data",
        }
    }

    /// Fixed frame length this command encodes to
    #[must_use]
    pub fn frame_len(&self) -> usize {
        match self {
            Command::ReadStatus => LEN_READ_STATUS,
            Command::EmergencyStop { .. } => LEN_EMERGENCY_STOP,
            Command::AxisStop { .. } => LEN_AXIS_STOP,
            Command::Standby => LEN_STANDBY,
            Command::ManualMove(_) => LEN_MANUAL_MOVE,
            Command::Feed { .. } => LEN_FEED,
            Command::PositionOffset { .. } => LEN_POSITION_OFFSET,
            Command::TimeOffset { .. } => LEN_TIME_OFFSET,
            Command::EncoderPreset { .. } => LEN_ENCODER_PRESET,
            Command::AlarmReset { .. } => LEN_ALARM_RESET,
            Command::SatTrackHeader(_) => LEN_SAT_TRACK_HEADER,
            Command::SatTrackInitial(_) => LEN_SAT_TRACK_INITIAL,
            Command::SatTrackData(_) => LEN_SAT_TRACK_DATA,
        }
    }
}

/// One decoded datagram
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// An ACU-to-firmware command (seen when decoding our own traffic)
    Command(Command),
    /// Full status response from the firmware
    Status(Box<StatusSnapshot>),
    /// Firmware pull request for the next satellite-track block
    SatTrackRequest { elapsed_ms: u32 },
}

/// Fixed frame length for the frame at the start of `frame`, if its
/// selector is known.
///
/// `frame` must hold at least the STX and the selector bytes. The status
/// selector is shared by the 5-byte request and the 172-byte response, see
/// [`status_frame_len`].
#[must_use]
pub fn expected_frame_len(frame: &[u8]) -> Option<usize> {
    let selector = *frame.get(1)?;
    let sub = frame.get(2).copied().unwrap_or(0);
    let len = match selector {
        SEL_STATUS => status_frame_len(frame),
        SEL_EMERGENCY_STOP => LEN_EMERGENCY_STOP,
        SEL_AXIS_STOP => LEN_AXIS_STOP,
        SEL_STANDBY => LEN_STANDBY,
        SEL_MANUAL_MOVE => LEN_MANUAL_MOVE,
        SEL_FEED => LEN_FEED,
        SEL_POSITION_OFFSET => LEN_POSITION_OFFSET,
        SEL_TIME_OFFSET => LEN_TIME_OFFSET,
        SEL_ENCODER_PRESET => LEN_ENCODER_PRESET,
        SEL_ALARM_RESET => LEN_ALARM_RESET,
        SEL_SAT_TRACK => match sub {
            SUB_SAT_TRACK_HEADER => LEN_SAT_TRACK_HEADER,
            SUB_SAT_TRACK_INITIAL => LEN_SAT_TRACK_INITIAL,
            SUB_SAT_TRACK_REQUEST => LEN_SAT_TRACK_REQUEST,
            SUB_SAT_TRACK_DATA => LEN_SAT_TRACK_DATA,
            _ => return None,
        },
        _ => return None,
    };
    Some(len)
}

/// Length of a status-selector frame: request or response.
///
/// Whichever length yields a complete frame (checksum and ETX in place)
/// wins, response first. A buffer of exactly request length that is neither
/// is still treated as a request so its own error is reported.
fn status_frame_len(frame: &[u8]) -> usize {
    if is_complete_frame(frame, LEN_STATUS_RESPONSE) {
        LEN_STATUS_RESPONSE
    } else if is_complete_frame(frame, LEN_READ_STATUS) || frame.len() == LEN_READ_STATUS {
        LEN_READ_STATUS
    } else {
        LEN_STATUS_RESPONSE
    }
}

/// True if the first `len` bytes of `frame` carry a valid checksum and ETX
fn is_complete_frame(frame: &[u8], len: usize) -> bool {
    if frame.len() < len || frame[len - 1] != ICD_ETX {
        return false;
    }
    let received = u16::from_be_bytes([frame[len - 3], frame[len - 2]]);
    crc16_ccitt(&frame[1..len - 3]) == received
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(ICD_STX, 0x02);
        assert_eq!(ICD_ETX, 0x03);
        assert_eq!(ICD_MIN_FRAME_LEN, LEN_READ_STATUS);
    }

    #[test]
    fn test_fixed_lengths_match_payload_layout() {
        // selector(1) + axes(1) + 6 floats
        assert_eq!(LEN_MANUAL_MOVE, ICD_FRAMING_OVERHEAD + 1 + 1 + 6 * 4);
        // selector(1) + bands(1) + on(1)
        assert_eq!(LEN_FEED, ICD_FRAMING_OVERHEAD + 3);
        // selector(2) + aos(4) + los(4) + points(2) + step(2)
        assert_eq!(LEN_SAT_TRACK_HEADER, ICD_FRAMING_OVERHEAD + 2 + 12);
        // selector(2) + ntp(8) + offset(4) + count(2) + 50 points
        assert_eq!(
            LEN_SAT_TRACK_INITIAL,
            ICD_FRAMING_OVERHEAD + 2 + 14 + SAT_TRACK_BLOCK_POINTS * 8
        );
        // selector(2) + elapsed(4) + count(2) + 50 points
        assert_eq!(
            LEN_SAT_TRACK_DATA,
            ICD_FRAMING_OVERHEAD + 2 + 6 + SAT_TRACK_BLOCK_POINTS * 8
        );
    }

    /// `len`-byte buffer starting with STX, selector and sub-selector.
    fn frame_buf(selector: u8, sub: u8, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        buf[0] = ICD_STX;
        buf[1] = selector;
        buf[2] = sub;
        buf
    }

    #[test]
    fn test_status_selector_disambiguated_by_length() {
        assert_eq!(expected_frame_len(&frame_buf(SEL_STATUS, 0, 5)), Some(LEN_READ_STATUS));
        assert_eq!(expected_frame_len(&frame_buf(SEL_STATUS, 0, 172)), Some(LEN_STATUS_RESPONSE));
        assert_eq!(expected_frame_len(&frame_buf(SEL_STATUS, 0, 40)), Some(LEN_STATUS_RESPONSE));
    }

    #[test]
    fn test_unknown_selectors() {
        assert_eq!(expected_frame_len(&frame_buf(0x7F, 0, 10)), None);
        assert_eq!(expected_frame_len(&frame_buf(SEL_SAT_TRACK, 0x09, 10)), None);
    }

    #[test]
    fn test_axis_mask_ops() {
        let mask = AxisMask::AZIMUTH | AxisMask::ELEVATION;
        assert_eq!(mask, AxisMask::AZ_EL);
        assert!(AxisMask::ALL.contains(AxisMask::TRAIN));
        assert!(!mask.contains(AxisMask::TRAIN));
    }

    #[test]
    fn test_command_frame_len() {
        assert_eq!(Command::ReadStatus.frame_len(), 5);
        assert_eq!(Command::AxisStop { axes: AxisMask::ALL }.frame_len(), 6);
        assert_eq!(Command::ManualMove(ManualMove::default()).frame_len(), 30);
    }
}
