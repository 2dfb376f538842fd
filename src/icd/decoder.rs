//! # ICD Frame Decoder
//!
//! Validates and decodes one datagram into at most one [`Frame`].
//!
//! Checks run in a fixed order: length against the command's fixed size,
//! checksum, then the trailing end marker. Only a frame passing all three is
//! returned.

use bytes::Buf;

use super::checksum::crc16_ccitt;
use super::protocol::*;
use super::status::StatusSnapshot;
use crate::error::DecodeError;

/// Decode a complete ICD frame
///
/// Bytes past the command's fixed length are ignored.
///
/// # Errors
///
/// - `TooShort` if the buffer is smaller than the command's fixed length
/// - `FramingError` if the start or end marker is wrong
/// - `ChecksumMismatch` if the recomputed checksum disagrees
/// - `UnknownSelector` if the selector names no known command
///
/// # Examples
///
/// ```
/// use acu_control::icd::decoder::decode;
/// use acu_control::icd::encoder::encode;
/// use acu_control::icd::protocol::{Command, Frame};
///
/// let frame = encode(&Command::Standby);
/// assert_eq!(decode(&frame).unwrap(), Frame::Command(Command::Standby));
/// ```
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    if bytes.len() < ICD_MIN_FRAME_LEN {
        return Err(DecodeError::TooShort {
            expected: ICD_MIN_FRAME_LEN,
            actual: bytes.len(),
        });
    }

    if bytes[0] != ICD_STX {
        return Err(DecodeError::FramingError("missing start marker"));
    }

    let expected = expected_frame_len(bytes).ok_or(DecodeError::UnknownSelector {
        selector: bytes[1],
        sub: bytes[2],
    })?;

    if bytes.len() < expected {
        return Err(DecodeError::TooShort {
            expected,
            actual: bytes.len(),
        });
    }

    let frame = &bytes[..expected];
    let body = &frame[1..expected - 3];
    let received = u16::from_be_bytes([frame[expected - 3], frame[expected - 2]]);
    let computed = crc16_ccitt(body);
    if computed != received {
        return Err(DecodeError::ChecksumMismatch { computed, received });
    }

    if frame[expected - 1] != ICD_ETX {
        return Err(DecodeError::FramingError("missing end marker"));
    }

    decode_body(body)
}

/// Decode selector + payload of a frame whose framing is already verified
fn decode_body(body: &[u8]) -> Result<Frame, DecodeError> {
    let selector = body[0];
    let mut payload = &body[1..];

    let command = match selector {
        SEL_STATUS if payload.is_empty() => Command::ReadStatus,
        SEL_STATUS => {
            return Ok(Frame::Status(Box::new(StatusSnapshot::read_block(payload))));
        }
        SEL_EMERGENCY_STOP => Command::EmergencyStop {
            engage: payload.get_u8() != 0,
        },
        SEL_AXIS_STOP => Command::AxisStop {
            axes: AxisMask(payload.get_u8()),
        },
        SEL_STANDBY => Command::Standby,
        SEL_MANUAL_MOVE => {
            let axes = AxisMask(payload.get_u8());
            let mut motion = || AxisMotion::new(payload.get_f32(), payload.get_f32());
            let azimuth = motion();
            let elevation = motion();
            let train = motion();
            Command::ManualMove(ManualMove {
                axes,
                azimuth,
                elevation,
                train,
            })
        }
        SEL_FEED => Command::Feed {
            bands: BandMask(payload.get_u8()),
            on: payload.get_u8() != 0,
        },
        SEL_POSITION_OFFSET => Command::PositionOffset {
            axes: AxisMask(payload.get_u8()),
            azimuth: payload.get_f32(),
            elevation: payload.get_f32(),
            train: payload.get_f32(),
        },
        SEL_TIME_OFFSET => Command::TimeOffset {
            seconds: payload.get_f32(),
        },
        SEL_ENCODER_PRESET => Command::EncoderPreset {
            axes: AxisMask(payload.get_u8()),
            angle: payload.get_f32(),
        },
        SEL_ALARM_RESET => Command::AlarmReset {
            axes: AxisMask(payload.get_u8()),
        },
        SEL_SAT_TRACK => return decode_sat_track(payload),
        other => {
            return Err(DecodeError::UnknownSelector {
                selector: other,
                sub: 0,
            })
        }
    };

    Ok(Frame::Command(command))
}

/// Satellite-track family; `payload` starts at the sub-selector
fn decode_sat_track(mut payload: &[u8]) -> Result<Frame, DecodeError> {
    let sub = payload.get_u8();

    let command = match sub {
        SUB_SAT_TRACK_REQUEST => {
            return Ok(Frame::SatTrackRequest {
                elapsed_ms: payload.get_u32(),
            });
        }
        SUB_SAT_TRACK_HEADER => Command::SatTrackHeader(SatTrackHeader {
            aos_unix_s: payload.get_u32(),
            los_unix_s: payload.get_u32(),
            total_points: payload.get_u16(),
            step_ms: payload.get_u16(),
        }),
        SUB_SAT_TRACK_INITIAL => {
            let ntp_seconds = payload.get_u32();
            let ntp_fraction = payload.get_u32();
            let time_offset_s = payload.get_f32();
            let points = get_points(&mut payload)?;
            Command::SatTrackInitial(SatTrackInitial {
                ntp_seconds,
                ntp_fraction,
                time_offset_s,
                points,
            })
        }
        SUB_SAT_TRACK_DATA => {
            let elapsed_ms = payload.get_u32();
            let points = get_points(&mut payload)?;
            Command::SatTrackData(SatTrackBlock { elapsed_ms, points })
        }
        other => {
            return Err(DecodeError::UnknownSelector {
                selector: SEL_SAT_TRACK,
                sub: other,
            })
        }
    };

    Ok(Frame::Command(command))
}

fn get_points(payload: &mut &[u8]) -> Result<Vec<TrackPoint>, DecodeError> {
    let count = payload.get_u16() as usize;
    if count > SAT_TRACK_BLOCK_POINTS {
        return Err(DecodeError::FramingError("point count exceeds block size"));
    }

    let points = (0..count)
        .map(|_| TrackPoint {
            elevation: payload.get_f32(),
            azimuth: payload.get_f32(),
        })
        .collect();
    Ok(points)
}
