//! # Status Block
//!
//! The firmware's status response, as a record of independently nullable
//! fields. A decoded 172-byte frame fills every field; a NaN float on the wire
//! is the firmware's "unknown" marker and decodes to `None`.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use super::protocol::STATUS_SPARE_BYTES;

/// Mode bit-vector flags
pub mod mode {
    pub const REMOTE: u16 = 0x0001;
    pub const STANDBY: u16 = 0x0002;
    pub const MANUAL: u16 = 0x0004;
    pub const PROGRAM_TRACK: u16 = 0x0008;
    pub const EMERGENCY: u16 = 0x0010;
    pub const STOWED: u16 = 0x0020;
}

/// Per-axis limit/stow/encoder bit-vector flags
pub mod limit {
    pub const CW_LIMIT: u16 = 0x0001;
    pub const CCW_LIMIT: u16 = 0x0002;
    pub const STOW_PIN: u16 = 0x0004;
    pub const STOW_POSITION: u16 = 0x0008;
    pub const ENCODER_FAULT: u16 = 0x0010;
}

/// Feedback for one mechanical axis
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisStatus {
    /// Measured angle in degrees
    pub angle: Option<f32>,
    /// Measured speed in degrees/second
    pub speed: Option<f32>,
    /// Angle as reported by the servo driver
    pub driver_angle: Option<f32>,
    pub torque: Option<f32>,
    pub servo_status: Option<u16>,
    /// See [`limit`]
    pub limit_flags: Option<u16>,
}

/// Status and RF readings for one feed band, per polarization
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeedStatus {
    pub status: Option<u16>,
    pub lna_current_rhcp: Option<f32>,
    pub lna_current_lhcp: Option<f32>,
    pub rssi_rhcp: Option<f32>,
    pub rssi_lhcp: Option<f32>,
}

/// Latest known antenna state; every field may be unknown
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// See [`mode`]
    pub mode: Option<u16>,
    pub azimuth: AxisStatus,
    pub elevation: AxisStatus,
    pub train: AxisStatus,
    pub wind_speed: Option<f32>,
    pub wind_direction: Option<f32>,
    pub rtd1: Option<f32>,
    pub rtd2: Option<f32>,
    pub main_board_protocol: Option<u8>,
    pub main_board_status: Option<u8>,
    pub mc_power: Option<u8>,
    pub feed_s: FeedStatus,
    pub feed_x: FeedStatus,
    pub feed_ka: FeedStatus,
}

impl StatusSnapshot {
    /// True if the mode bit-vector is known and has `flag` set
    #[must_use]
    pub fn mode_flag(&self, flag: u16) -> bool {
        self.mode.map(|m| m & flag != 0).unwrap_or(false)
    }

    /// Decode the status block that follows the selector byte.
    ///
    /// The caller has already verified length, checksum and markers.
    pub(crate) fn read_block(mut buf: &[u8]) -> Self {
        let mut s = StatusSnapshot {
            mode: Some(buf.get_u16()),
            ..Default::default()
        };

        for axis in [&mut s.azimuth, &mut s.elevation, &mut s.train] {
            axis.angle = get_opt_f32(&mut buf);
            axis.speed = get_opt_f32(&mut buf);
        }
        for axis in [&mut s.azimuth, &mut s.elevation, &mut s.train] {
            axis.driver_angle = get_opt_f32(&mut buf);
        }
        for axis in [&mut s.azimuth, &mut s.elevation, &mut s.train] {
            axis.torque = get_opt_f32(&mut buf);
        }

        s.wind_speed = get_opt_f32(&mut buf);
        s.wind_direction = get_opt_f32(&mut buf);
        s.rtd1 = get_opt_f32(&mut buf);
        s.rtd2 = get_opt_f32(&mut buf);
        s.main_board_protocol = Some(buf.get_u8());
        s.main_board_status = Some(buf.get_u8());
        s.mc_power = Some(buf.get_u8());

        for axis in [&mut s.azimuth, &mut s.elevation, &mut s.train] {
            axis.servo_status = Some(buf.get_u16());
        }
        for axis in [&mut s.azimuth, &mut s.elevation, &mut s.train] {
            axis.limit_flags = Some(buf.get_u16());
        }
        for feed in [&mut s.feed_s, &mut s.feed_x, &mut s.feed_ka] {
            feed.status = Some(buf.get_u16());
        }
        for feed in [&mut s.feed_s, &mut s.feed_x, &mut s.feed_ka] {
            feed.lna_current_rhcp = get_opt_f32(&mut buf);
            feed.lna_current_lhcp = get_opt_f32(&mut buf);
        }
        for feed in [&mut s.feed_s, &mut s.feed_x, &mut s.feed_ka] {
            feed.rssi_rhcp = get_opt_f32(&mut buf);
            feed.rssi_lhcp = get_opt_f32(&mut buf);
        }

        s
    }

    /// Encode the status block in firmware layout; unknown floats become NaN,
    /// unknown integers become zero.
    pub(crate) fn write_block<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.mode.unwrap_or(0));

        let axes = [&self.azimuth, &self.elevation, &self.train];
        for axis in axes {
            put_opt_f32(buf, axis.angle);
            put_opt_f32(buf, axis.speed);
        }
        for axis in axes {
            put_opt_f32(buf, axis.driver_angle);
        }
        for axis in axes {
            put_opt_f32(buf, axis.torque);
        }

        put_opt_f32(buf, self.wind_speed);
        put_opt_f32(buf, self.wind_direction);
        put_opt_f32(buf, self.rtd1);
        put_opt_f32(buf, self.rtd2);
        buf.put_u8(self.main_board_protocol.unwrap_or(0));
        buf.put_u8(self.main_board_status.unwrap_or(0));
        buf.put_u8(self.mc_power.unwrap_or(0));

        for axis in axes {
            buf.put_u16(axis.servo_status.unwrap_or(0));
        }
        for axis in axes {
            buf.put_u16(axis.limit_flags.unwrap_or(0));
        }

        let feeds = [&self.feed_s, &self.feed_x, &self.feed_ka];
        for feed in feeds {
            buf.put_u16(feed.status.unwrap_or(0));
        }
        for feed in feeds {
            put_opt_f32(buf, feed.lna_current_rhcp);
            put_opt_f32(buf, feed.lna_current_lhcp);
        }
        for feed in feeds {
            put_opt_f32(buf, feed.rssi_rhcp);
            put_opt_f32(buf, feed.rssi_lhcp);
        }

        buf.put_bytes(0, STATUS_SPARE_BYTES);
    }
}

fn get_opt_f32(buf: &mut &[u8]) -> Option<f32> {
    let value = buf.get_f32();
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

fn put_opt_f32<B: BufMut>(buf: &mut B, value: Option<f32>) {
    buf.put_f32(value.unwrap_or(f32::NAN));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icd::protocol::{ICD_FRAMING_OVERHEAD, LEN_STATUS_RESPONSE};

    #[test]
    fn test_status_block_size() {
        let mut buf = Vec::new();
        StatusSnapshot::default().write_block(&mut buf);
        // selector byte is not part of the block
        assert_eq!(buf.len(), LEN_STATUS_RESPONSE - ICD_FRAMING_OVERHEAD - 1);
    }

    #[test]
    fn test_all_zero_block() {
        let block = vec![0u8; LEN_STATUS_RESPONSE - ICD_FRAMING_OVERHEAD - 1];
        let status = StatusSnapshot::read_block(&block);

        assert_eq!(status.mode, Some(0));
        assert_eq!(status.azimuth.angle, Some(0.0));
        assert_eq!(status.train.limit_flags, Some(0));
        assert_eq!(status.feed_ka.rssi_lhcp, Some(0.0));
        assert_eq!(status.mc_power, Some(0));
    }

    #[test]
    fn test_nan_reads_as_unknown() {
        let mut status = StatusSnapshot::default();
        status.mode = Some(mode::REMOTE);
        status.elevation.angle = Some(45.5);

        let mut buf = Vec::new();
        status.write_block(&mut buf);
        let decoded = StatusSnapshot::read_block(&buf);

        assert_eq!(decoded.elevation.angle, Some(45.5));
        assert_eq!(decoded.azimuth.angle, None);
        assert_eq!(decoded.wind_speed, None);
        assert!(decoded.mode_flag(mode::REMOTE));
        assert!(!decoded.mode_flag(mode::EMERGENCY));
    }

    #[test]
    fn test_field_order() {
        let mut status = StatusSnapshot::default();
        status.mode = Some(0x1234);
        status.azimuth.angle = Some(1.0);

        let mut buf = Vec::new();
        status.write_block(&mut buf);

        // mode is big-endian and first
        assert_eq!(&buf[0..2], &[0x12, 0x34]);
        // azimuth angle follows
        assert_eq!(&buf[2..6], &1.0f32.to_be_bytes());
    }
}
