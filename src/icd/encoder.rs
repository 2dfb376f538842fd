//! # ICD Frame Encoder
//!
//! Serializes commands into fixed-length ICD frames.

use bytes::{BufMut, BytesMut};

use super::checksum::crc16_ccitt;
use super::protocol::*;
use super::status::StatusSnapshot;

/// Encode a command into a complete ICD frame
///
/// Inputs are validated by the caller; point lists longer than one block are
/// truncated to [`SAT_TRACK_BLOCK_POINTS`].
///
/// # Examples
///
/// ```
/// use acu_control::icd::encoder::encode;
/// use acu_control::icd::protocol::{Command, ICD_STX, ICD_ETX};
///
/// let frame = encode(&Command::ReadStatus);
/// assert_eq!(frame.len(), 5);
/// assert_eq!(frame[0], ICD_STX);
/// assert_eq!(frame[4], ICD_ETX);
/// ```
pub fn encode(command: &Command) -> Vec<u8> {
    let mut body = BytesMut::with_capacity(command.frame_len());

    match command {
        Command::ReadStatus => {
            body.put_u8(SEL_STATUS);
        }
        Command::EmergencyStop { engage } => {
            body.put_u8(SEL_EMERGENCY_STOP);
            body.put_u8(u8::from(*engage));
        }
        Command::AxisStop { axes } => {
            body.put_u8(SEL_AXIS_STOP);
            body.put_u8(axes.0);
        }
        Command::Standby => {
            body.put_u8(SEL_STANDBY);
        }
        Command::ManualMove(mv) => {
            body.put_u8(SEL_MANUAL_MOVE);
            body.put_u8(mv.axes.0);
            for motion in [mv.azimuth, mv.elevation, mv.train] {
                body.put_f32(motion.angle);
                body.put_f32(motion.speed);
            }
        }
        Command::Feed { bands, on } => {
            body.put_u8(SEL_FEED);
            body.put_u8(bands.0);
            body.put_u8(u8::from(*on));
        }
        Command::PositionOffset {
            axes,
            azimuth,
            elevation,
            train,
        } => {
            body.put_u8(SEL_POSITION_OFFSET);
            body.put_u8(axes.0);
            body.put_f32(*azimuth);
            body.put_f32(*elevation);
            body.put_f32(*train);
        }
        Command::TimeOffset { seconds } => {
            body.put_u8(SEL_TIME_OFFSET);
            body.put_f32(*seconds);
        }
        Command::EncoderPreset { axes, angle } => {
            body.put_u8(SEL_ENCODER_PRESET);
            body.put_u8(axes.0);
            body.put_f32(*angle);
        }
        Command::AlarmReset { axes } => {
            body.put_u8(SEL_ALARM_RESET);
            body.put_u8(axes.0);
        }
        Command::SatTrackHeader(header) => {
            body.put_u8(SEL_SAT_TRACK);
            body.put_u8(SUB_SAT_TRACK_HEADER);
            body.put_u32(header.aos_unix_s);
            body.put_u32(header.los_unix_s);
            body.put_u16(header.total_points);
            body.put_u16(header.step_ms);
        }
        Command::SatTrackInitial(initial) => {
            body.put_u8(SEL_SAT_TRACK);
            body.put_u8(SUB_SAT_TRACK_INITIAL);
            body.put_u32(initial.ntp_seconds);
            body.put_u32(initial.ntp_fraction);
            body.put_f32(initial.time_offset_s);
            put_points(&mut body, &initial.points);
        }
        Command::SatTrackData(block) => {
            body.put_u8(SEL_SAT_TRACK);
            body.put_u8(SUB_SAT_TRACK_DATA);
            body.put_u32(block.elapsed_ms);
            put_points(&mut body, &block.points);
        }
    }

    seal(&body)
}

/// Encode a firmware status response.
///
/// Used by link tests and bench simulators that stand in for the firmware.
pub fn encode_status(status: &StatusSnapshot) -> Vec<u8> {
    let mut body = BytesMut::with_capacity(LEN_STATUS_RESPONSE);
    body.put_u8(SEL_STATUS);
    status.write_block(&mut body);
    seal(&body)
}

/// Encode a firmware pull request for the next satellite-track block
pub fn encode_sat_track_request(elapsed_ms: u32) -> Vec<u8> {
    let mut body = BytesMut::with_capacity(LEN_SAT_TRACK_REQUEST);
    body.put_u8(SEL_SAT_TRACK);
    body.put_u8(SUB_SAT_TRACK_REQUEST);
    body.put_u32(elapsed_ms);
    seal(&body)
}

/// Count field followed by a zero-filled fixed block of point slots
fn put_points(body: &mut BytesMut, points: &[TrackPoint]) {
    let used = points.len().min(SAT_TRACK_BLOCK_POINTS);
    body.put_u16(used as u16);
    for point in &points[..used] {
        body.put_f32(point.elevation);
        body.put_f32(point.azimuth);
    }
    body.put_bytes(0, (SAT_TRACK_BLOCK_POINTS - used) * 8);
}

/// Wrap selector + payload in STX, checksum and ETX
fn seal(body: &[u8]) -> Vec<u8> {
    let crc = crc16_ccitt(body);

    let mut frame = Vec::with_capacity(body.len() + ICD_FRAMING_OVERHEAD);
    frame.push(ICD_STX);
    frame.extend_from_slice(body);
    frame.put_u16(crc);
    frame.push(ICD_ETX);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_commands() -> Vec<Command> {
        vec![
            Command::ReadStatus,
            Command::EmergencyStop { engage: true },
            Command::AxisStop { axes: AxisMask::ALL },
            Command::Standby,
            Command::ManualMove(ManualMove {
                axes: AxisMask::AZ_EL,
                azimuth: AxisMotion::new(120.5, 2.0),
                elevation: AxisMotion::new(35.0, 1.5),
                train: AxisMotion::default(),
            }),
            Command::Feed { bands: BandMask::X, on: true },
            Command::PositionOffset {
                axes: AxisMask::ALL,
                azimuth: 0.1,
                elevation: -0.2,
                train: 0.0,
            },
            Command::TimeOffset { seconds: 1.5 },
            Command::EncoderPreset { axes: AxisMask::TRAIN, angle: 0.0 },
            Command::AlarmReset { axes: AxisMask::ALL },
            Command::SatTrackHeader(SatTrackHeader {
                aos_unix_s: 1_700_000_000,
                los_unix_s: 1_700_000_600,
                total_points: 6000,
                step_ms: SAT_TRACK_STEP_MS,
            }),
            Command::SatTrackInitial(SatTrackInitial {
                ntp_seconds: 3_900_000_000,
                ntp_fraction: 0x8000_0000,
                time_offset_s: 0.0,
                points: vec![TrackPoint { elevation: 5.0, azimuth: 10.0 }; 3],
            }),
            Command::SatTrackData(SatTrackBlock {
                elapsed_ms: 5000,
                points: vec![TrackPoint { elevation: 6.0, azimuth: 11.0 }; 50],
            }),
        ]
    }

    #[test]
    fn test_every_command_has_its_fixed_length() {
        for command in all_commands() {
            let frame = encode(&command);
            assert_eq!(frame.len(), command.frame_len(), "{}", command.name());
        }
    }

    #[test]
    fn test_every_frame_is_delimited() {
        for command in all_commands() {
            let frame = encode(&command);
            assert_eq!(frame[0], ICD_STX);
            assert_eq!(*frame.last().unwrap(), ICD_ETX);
        }
    }

    #[test]
    fn test_checksum_covers_selector_and_payload() {
        let frame = encode(&Command::AxisStop { axes: AxisMask::ALL });
        let n = frame.len();
        let crc = u16::from_be_bytes([frame[n - 3], frame[n - 2]]);
        assert_eq!(crc, crc16_ccitt(&frame[1..n - 3]));
    }

    #[test]
    fn test_manual_move_layout() {
        let frame = encode(&Command::ManualMove(ManualMove {
            axes: AxisMask::ALL,
            azimuth: AxisMotion::new(1.0, 2.0),
            elevation: AxisMotion::new(3.0, 4.0),
            train: AxisMotion::new(5.0, 6.0),
        }));

        assert_eq!(frame[1], SEL_MANUAL_MOVE);
        assert_eq!(frame[2], 0x07);
        assert_eq!(&frame[3..7], &1.0f32.to_be_bytes());
        assert_eq!(&frame[23..27], &6.0f32.to_be_bytes());
    }

    #[test]
    fn test_points_truncated_to_one_block() {
        let frame = encode(&Command::SatTrackData(SatTrackBlock {
            elapsed_ms: 0,
            points: vec![TrackPoint::default(); 80],
        }));

        assert_eq!(frame.len(), LEN_SAT_TRACK_DATA);
        // count field right after the elapsed accumulator
        assert_eq!(u16::from_be_bytes([frame[7], frame[8]]), 50);
    }

    #[test]
    fn test_status_and_request_lengths() {
        assert_eq!(encode_status(&StatusSnapshot::default()).len(), LEN_STATUS_RESPONSE);
        assert_eq!(encode_sat_track_request(5000).len(), LEN_SAT_TRACK_REQUEST);
    }

    #[test]
    fn test_different_data_different_checksum() {
        let a = encode(&Command::TimeOffset { seconds: 1.0 });
        let b = encode(&Command::TimeOffset { seconds: 2.0 });
        assert_ne!(a[a.len() - 3..a.len() - 1], b[b.len() - 3..b.len() - 1]);
    }
}
