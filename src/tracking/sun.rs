//! Continuous sun tracking.
//!
//! The train axis is parked facing the middle of the day's sun path so the
//! azimuth axis sweeps symmetrically. Once settled, the sun's mount-frame
//! direction is recomputed and commanded every tick until stopped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::machine::{ActiveOutcome, TickContext, TrackingStrategy};
use super::phase::ActionLedger;
use crate::ephemeris::{DailySunPath, GroundStation, SunEphemeris};
use crate::error::TrackingError;
use crate::geometry::{normalize_mechanical, unwrap_azimuth, AzEl, CoordinateTransform};
use crate::icd::protocol::{AxisMask, AxisMotion, ManualMove};
use crate::icd::Command;

/// Operator-chosen axis speeds for a sun session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunSpeeds {
    pub azimuth_deg_s: f32,
    pub elevation_deg_s: f32,
}

impl Default for SunSpeeds {
    fn default() -> Self {
        Self {
            azimuth_deg_s: 1.0,
            elevation_deg_s: 1.0,
        }
    }
}

/// Train target for a day's sun path.
///
/// With rise and set crossings the target is the midpoint of their
/// azimuths, folded across north when the path faces north. Without
/// crossings the sun is either always up (aim at the noon azimuth) or never
/// up, which cannot be tracked.
///
/// # Errors
///
/// Returns `TrackingError::PolarNight` if the sun does not rise
pub fn train_target_for_path(
    path: &DailySunPath,
    current_elevation_deg: f64,
) -> Result<f64, TrackingError> {
    match (path.sunrise_azimuth_deg, path.sunset_azimuth_deg) {
        (Some(rise), Some(set)) => {
            let south_facing = path.noon_azimuth_deg > 90.0 && path.noon_azimuth_deg < 270.0;
            let midpoint = if south_facing {
                (rise + set) / 2.0
            } else {
                (rise + set - 360.0) / 2.0
            };
            Ok(normalize_mechanical(midpoint))
        }
        _ if current_elevation_deg > 0.0 || path.noon_elevation_deg > 0.0 => {
            Ok(normalize_mechanical(path.noon_azimuth_deg))
        }
        _ => Err(TrackingError::PolarNight),
    }
}

/// Follows the sun from the configured site
pub struct SunStrategy {
    ephemeris: Arc<dyn SunEphemeris>,
    transform: Arc<dyn CoordinateTransform>,
    station: GroundStation,
    speeds: SunSpeeds,
    train_target_deg: Option<f64>,
    last_command: Option<AzEl>,
}

impl std::fmt::Debug for SunStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SunStrategy")
            .field("station", &self.station)
            .field("speeds", &self.speeds)
            .field("train_target_deg", &self.train_target_deg)
            .finish_non_exhaustive()
    }
}

impl SunStrategy {
    #[must_use]
    pub fn new(
        ephemeris: Arc<dyn SunEphemeris>,
        transform: Arc<dyn CoordinateTransform>,
        station: GroundStation,
    ) -> Self {
        Self {
            ephemeris,
            transform,
            station,
            speeds: SunSpeeds::default(),
            train_target_deg: None,
            last_command: None,
        }
    }

    /// Sun direction in the mount frame, azimuth unwrapped across north
    fn pointing(&self, ctx: &TickContext<'_>, train_deg: f64) -> AzEl {
        let sky = self.ephemeris.position(&self.station, ctx.now);
        let mount = self
            .transform
            .transform(sky, ctx.settings.tilt_offset_deg, train_deg);
        AzEl::new(
            unwrap_azimuth(mount.azimuth_deg),
            mount.elevation_deg.clamp(0.0, 90.0),
        )
    }
}

impl TrackingStrategy for SunStrategy {
    type Session = SunSpeeds;

    fn name(&self) -> &'static str {
        "sun"
    }

    fn begin(&mut self, speeds: SunSpeeds) {
        info!(
            "Sun tracking requested: az {:.2} deg/s, el {:.2} deg/s",
            speeds.azimuth_deg_s, speeds.elevation_deg_s
        );
        self.speeds = speeds;
        self.train_target_deg = None;
        self.last_command = None;
    }

    fn end(&mut self) {
        self.train_target_deg = None;
        self.last_command = None;
    }

    fn secondary_target(&mut self, ctx: &TickContext<'_>) -> Result<f64, TrackingError> {
        if let Some(target) = self.train_target_deg {
            return Ok(target);
        }

        let path = self.ephemeris.daily_path(&self.station, ctx.now);
        let now = self.ephemeris.position(&self.station, ctx.now);
        let target = train_target_for_path(&path, now.elevation_deg)?;
        info!(
            "Sun path: rise {:?} set {:?} noon az {:.2}; train target {:.2} deg",
            path.sunrise_azimuth_deg, path.sunset_azimuth_deg, path.noon_azimuth_deg, target
        );

        self.train_target_deg = Some(target);
        Ok(target)
    }

    fn acquisition_target(
        &mut self,
        ctx: &TickContext<'_>,
        train_deg: f64,
    ) -> Result<Option<AzEl>, TrackingError> {
        Ok(Some(self.pointing(ctx, train_deg)))
    }

    fn active_tick(
        &mut self,
        ctx: &TickContext<'_>,
        train_deg: f64,
        _ledger: &mut ActionLedger,
    ) -> Result<ActiveOutcome, TrackingError> {
        let target = self.pointing(ctx, train_deg);
        debug!(
            "Sun at mount az {:.3} el {:.3}",
            target.azimuth_deg, target.elevation_deg
        );

        ctx.send(Command::ManualMove(ManualMove {
            axes: AxisMask::AZ_EL,
            azimuth: AxisMotion::new(target.azimuth_deg as f32, self.speeds.azimuth_deg_s),
            elevation: AxisMotion::new(target.elevation_deg as f32, self.speeds.elevation_deg_s),
            ..ManualMove::default()
        }))?;
        self.last_command = Some(target);
        Ok(ActiveOutcome::Continue)
    }

    fn detail(&self) -> Option<String> {
        self.last_command
            .map(|c| format!("sun az {:.2} el {:.2}", c.azimuth_deg, c.elevation_deg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::transform::MockCoordinateTransform;
    use crate::tracking::machine::tests::Harness;
    use crate::tracking::machine::Tracker;
    use crate::tracking::phase::TrackingPhase;
    use chrono::{DateTime, Utc};

    /// Sun that never moves
    struct FixedSun {
        position: AzEl,
        path: DailySunPath,
    }

    impl SunEphemeris for FixedSun {
        fn position(&self, _station: &GroundStation, _at: DateTime<Utc>) -> AzEl {
            self.position
        }

        fn daily_path(&self, _station: &GroundStation, _at: DateTime<Utc>) -> DailySunPath {
            self.path
        }
    }

    fn path(rise: Option<f64>, set: Option<f64>, noon_az: f64, noon_el: f64) -> DailySunPath {
        DailySunPath {
            sunrise_azimuth_deg: rise,
            sunset_azimuth_deg: set,
            noon_azimuth_deg: noon_az,
            noon_elevation_deg: noon_el,
        }
    }

    fn strategy(sun: FixedSun, mount: AzEl) -> SunStrategy {
        let mut transform = MockCoordinateTransform::new();
        transform.expect_transform().returning(move |_, _, _| mount);
        SunStrategy::new(
            Arc::new(sun),
            Arc::new(transform),
            GroundStation::new(45.0, 10.0, 0.0),
        )
    }

    #[test]
    fn test_south_facing_path_targets_midpoint() {
        let target = train_target_for_path(&path(Some(120.0), Some(240.0), 180.0, 40.0), 10.0);
        assert_eq!(target, Ok(180.0));
    }

    #[test]
    fn test_north_facing_path_folds_sunset() {
        let target = train_target_for_path(&path(Some(60.0), Some(300.0), 0.0, 40.0), 10.0);
        assert_eq!(target, Ok(0.0));

        let target = train_target_for_path(&path(Some(70.0), Some(310.0), 10.0, 40.0), 10.0);
        assert_eq!(target, Ok(10.0));
    }

    #[test]
    fn test_polar_day_uses_noon_azimuth() {
        let target = train_target_for_path(&path(None, None, 200.0, 20.0), 5.0);
        assert_eq!(target, Ok(200.0));
    }

    #[test]
    fn test_polar_night_is_not_trackable() {
        let target = train_target_for_path(&path(None, None, 180.0, -3.0), -10.0);
        assert_eq!(target, Err(TrackingError::PolarNight));
    }

    #[test]
    fn test_polar_night_returns_tracker_to_idle() {
        let mut h = Harness::new();
        let sun = FixedSun {
            position: AzEl::new(180.0, -10.0),
            path: path(None, None, 180.0, -3.0),
        };
        let mut tracker = Tracker::new(strategy(sun, AzEl::new(0.0, 0.0)));
        tracker.start(SunSpeeds::default()).unwrap();

        h.tick(&mut tracker);
        assert!(tracker.is_idle());
        assert_eq!(tracker.state().last_error, Some(TrackingError::PolarNight));
        assert_eq!(tracker.status().label, "error");
    }

    #[test]
    fn test_tracks_unwrapped_sun_every_tick() {
        let mut h = Harness::new();
        let sun = FixedSun {
            position: AzEl::new(170.0, 30.0),
            path: path(Some(120.0), Some(240.0), 180.0, 40.0),
        };
        let mut tracker = Tracker::new(strategy(sun, AzEl::new(350.0, 20.0)));
        let speeds = SunSpeeds {
            azimuth_deg_s: 0.5,
            elevation_deg_s: 0.25,
        };
        tracker.start(speeds).unwrap();

        h.tick(&mut tracker);
        assert_eq!(tracker.state().train_target_deg, Some(180.0));
        h.telemetry.train.angle = Some(180.0);
        h.run_for(&mut tracker, 1500);
        assert_eq!(tracker.phase(), TrackingPhase::MovingToTarget);

        h.telemetry.azimuth.angle = Some(-10.0);
        h.telemetry.elevation.angle = Some(20.0);
        h.tick(&mut tracker);
        assert_eq!(tracker.phase(), TrackingPhase::Active);

        h.sink.clear();
        h.run_for(&mut tracker, 500);
        let expected = Command::ManualMove(ManualMove {
            axes: AxisMask::AZ_EL,
            azimuth: AxisMotion::new(-10.0, 0.5),
            elevation: AxisMotion::new(20.0, 0.25),
            ..ManualMove::default()
        });
        assert_eq!(h.sink.commands(), vec![expected; 5]);
        assert_eq!(tracker.phase(), TrackingPhase::Active);
        assert_eq!(
            tracker.status().detail.as_deref(),
            Some("sun az -10.00 el 20.00")
        );
    }

    #[test]
    fn test_commanded_elevation_never_below_horizon() {
        let h = Harness::new();
        let sun = FixedSun {
            position: AzEl::new(90.0, 2.0),
            path: path(Some(90.0), Some(270.0), 180.0, 40.0),
        };
        let s = strategy(sun, AzEl::new(90.0, -4.0));
        let pointing = s.pointing(&h.ctx(), 180.0);
        assert_eq!(pointing, AzEl::new(90.0, 0.0));
    }

    #[test]
    fn test_train_target_cached_for_session() {
        let h = Harness::new();
        let sun = FixedSun {
            position: AzEl::new(100.0, 10.0),
            path: path(Some(100.0), Some(260.0), 180.0, 40.0),
        };
        let mut s = strategy(sun, AzEl::default());
        s.begin(SunSpeeds::default());
        assert_eq!(s.secondary_target(&h.ctx()), Ok(180.0));
        assert_eq!(s.train_target_deg, Some(180.0));

        s.end();
        assert!(s.train_target_deg.is_none());
    }
}
