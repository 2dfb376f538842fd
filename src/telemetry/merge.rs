//! Null-safe merge of status snapshots and the curated change signature.

use crate::icd::status::{AxisStatus, FeedStatus, StatusSnapshot};

impl AxisStatus {
    /// Take each field from `incoming` when known, else keep ours
    #[must_use]
    pub fn merged_with(&self, incoming: &AxisStatus) -> AxisStatus {
        AxisStatus {
            angle: incoming.angle.or(self.angle),
            speed: incoming.speed.or(self.speed),
            driver_angle: incoming.driver_angle.or(self.driver_angle),
            torque: incoming.torque.or(self.torque),
            servo_status: incoming.servo_status.or(self.servo_status),
            limit_flags: incoming.limit_flags.or(self.limit_flags),
        }
    }
}

impl FeedStatus {
    /// Take each field from `incoming` when known, else keep ours
    #[must_use]
    pub fn merged_with(&self, incoming: &FeedStatus) -> FeedStatus {
        FeedStatus {
            status: incoming.status.or(self.status),
            lna_current_rhcp: incoming.lna_current_rhcp.or(self.lna_current_rhcp),
            lna_current_lhcp: incoming.lna_current_lhcp.or(self.lna_current_lhcp),
            rssi_rhcp: incoming.rssi_rhcp.or(self.rssi_rhcp),
            rssi_lhcp: incoming.rssi_lhcp.or(self.rssi_lhcp),
        }
    }
}

impl StatusSnapshot {
    /// Merge a (possibly partial) update into this snapshot.
    ///
    /// A known incoming field always wins; an unknown one never erases what
    /// we already know.
    ///
    /// # Examples
    ///
    /// ```
    /// use acu_control::icd::status::StatusSnapshot;
    ///
    /// let mut known = StatusSnapshot::default();
    /// known.wind_speed = Some(4.0);
    ///
    /// let merged = known.merged_with(&StatusSnapshot::default());
    /// assert_eq!(merged.wind_speed, Some(4.0));
    /// ```
    #[must_use]
    pub fn merged_with(&self, incoming: &StatusSnapshot) -> StatusSnapshot {
        StatusSnapshot {
            mode: incoming.mode.or(self.mode),
            azimuth: self.azimuth.merged_with(&incoming.azimuth),
            elevation: self.elevation.merged_with(&incoming.elevation),
            train: self.train.merged_with(&incoming.train),
            wind_speed: incoming.wind_speed.or(self.wind_speed),
            wind_direction: incoming.wind_direction.or(self.wind_direction),
            rtd1: incoming.rtd1.or(self.rtd1),
            rtd2: incoming.rtd2.or(self.rtd2),
            main_board_protocol: incoming.main_board_protocol.or(self.main_board_protocol),
            main_board_status: incoming.main_board_status.or(self.main_board_status),
            mc_power: incoming.mc_power.or(self.mc_power),
            feed_s: self.feed_s.merged_with(&incoming.feed_s),
            feed_x: self.feed_x.merged_with(&incoming.feed_x),
            feed_ka: self.feed_ka.merged_with(&incoming.feed_ka),
        }
    }

    /// Coarse fingerprint used to decide whether a merge is worth publishing.
    ///
    /// Angles are compared at 0.01° resolution; wind, temperatures and RF
    /// readings are deliberately left out.
    #[must_use]
    pub fn signature(&self) -> Signature {
        let axis = |a: &AxisStatus| AxisSignature {
            angle_centideg: a.angle.map(|v| (v * 100.0).round() as i32),
            servo_status: a.servo_status,
            limit_flags: a.limit_flags,
        };

        Signature {
            mode: self.mode,
            main_board_status: self.main_board_status,
            mc_power: self.mc_power,
            axes: [axis(&self.azimuth), axis(&self.elevation), axis(&self.train)],
            feeds: [self.feed_s.status, self.feed_x.status, self.feed_ka.status],
        }
    }
}

/// Per-axis part of a [`Signature`]; angle compared at 0.01 degree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisSignature {
    angle_centideg: Option<i32>,
    servo_status: Option<u16>,
    limit_flags: Option<u16>,
}

/// Curated subset of a snapshot; see [`StatusSnapshot::signature`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    mode: Option<u16>,
    main_board_status: Option<u8>,
    mc_power: Option<u8>,
    axes: [AxisSignature; 3],
    feeds: [Option<u16>; 3],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> StatusSnapshot {
        let mut s = StatusSnapshot::default();
        s.mode = Some(1);
        s.azimuth.angle = Some(10.0);
        s.elevation.angle = Some(20.0);
        s.train.angle = Some(0.0);
        s.wind_speed = Some(3.0);
        s.feed_x.rssi_rhcp = Some(-80.0);
        s.main_board_status = Some(2);
        s
    }

    #[test]
    fn test_absent_field_never_changes_value() {
        let current = full();
        let merged = current.merged_with(&StatusSnapshot::default());
        assert_eq!(merged, current);
    }

    #[test]
    fn test_present_field_always_overwrites() {
        let current = full();
        let mut incoming = StatusSnapshot::default();
        incoming.azimuth.angle = Some(11.0);
        incoming.wind_speed = Some(0.0);
        incoming.feed_x.rssi_rhcp = Some(-60.0);

        let merged = current.merged_with(&incoming);
        assert_eq!(merged.azimuth.angle, Some(11.0));
        assert_eq!(merged.wind_speed, Some(0.0));
        assert_eq!(merged.feed_x.rssi_rhcp, Some(-60.0));
        // untouched fields survive
        assert_eq!(merged.elevation.angle, Some(20.0));
        assert_eq!(merged.mode, Some(1));
    }

    #[test]
    fn test_signature_ignores_wind_and_rf() {
        let a = full();
        let mut b = full();
        b.wind_speed = Some(30.0);
        b.feed_x.rssi_rhcp = Some(-20.0);
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn test_signature_tracks_angles_coarsely() {
        let a = full();
        let mut b = full();
        b.azimuth.angle = Some(10.001);
        assert_eq!(a.signature(), b.signature());

        b.azimuth.angle = Some(10.02);
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn test_signature_tracks_mode_and_limits() {
        let a = full();
        let mut b = full();
        b.mode = Some(3);
        assert_ne!(a.signature(), b.signature());

        let mut c = full();
        c.train.limit_flags = Some(1);
        assert_ne!(a.signature(), c.signature());
    }
}
