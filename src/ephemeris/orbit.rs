//! SGP4 orbit propagation into above-horizon passes.

use chrono::{DateTime, Duration, Utc};
use sgp4::{Constants, Elements};
use tracing::debug;

use super::{GroundStation, PropagatedPass, RawSample, Window, SAMPLE_STEP_MS};
use crate::error::ScheduleError;

/// Horizon crossing scan step
const SCAN_STEP_SECONDS: i64 = 1;

/// Mean Earth equatorial radius used for sub-satellite altitude
const EARTH_RADIUS_KM: f64 = 6378.137;

/// Mean motion band (revolutions/day) treated as geostationary
const GEO_MEAN_MOTION: std::ops::RangeInclusive<f64> = 0.98..=1.02;

/// A two-line element set with optional name line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tle {
    pub name: Option<String>,
    pub line1: String,
    pub line2: String,
}

impl Tle {
    /// Parse two or three lines of TLE text
    ///
    /// # Errors
    ///
    /// Returns `ScheduleError::InvalidTleFormat` if the text is not one
    /// optional name line followed by lines starting `1 ` and `2 `
    pub fn parse(text: &str) -> Result<Self, ScheduleError> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let (name, line1, line2) = match lines.as_slice() {
            [l1, l2] => (None, *l1, *l2),
            [name, l1, l2] => (Some(name.trim_start_matches("0 ").to_string()), *l1, *l2),
            _ => return Err(ScheduleError::InvalidTleFormat),
        };

        if !line1.starts_with("1 ") || !line2.starts_with("2 ") {
            return Err(ScheduleError::InvalidTleFormat);
        }

        Ok(Self {
            name,
            line1: line1.to_string(),
            line2: line2.to_string(),
        })
    }
}

/// Source of satellite passes
pub trait OrbitPropagator: Send + Sync {
    /// Find every pass in `window` peaking at or above `min_elevation_deg`
    ///
    /// # Errors
    ///
    /// Returns error if the TLE is invalid or propagation fails
    fn schedule(
        &self,
        tle: &Tle,
        station: &GroundStation,
        window: Window,
        min_elevation_deg: f64,
    ) -> Result<Vec<PropagatedPass>, ScheduleError>;
}

/// Propagates with SGP4/SDP4 from the `sgp4` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct Sgp4Propagator;

struct Orbit {
    elements: Elements,
    constants: Constants,
}

impl Orbit {
    fn from_tle(tle: &Tle) -> Result<Self, ScheduleError> {
        let elements =
            Elements::from_tle(tle.name.clone(), tle.line1.as_bytes(), tle.line2.as_bytes())?;
        let constants = Constants::from_elements(&elements)?;
        Ok(Self {
            elements,
            constants,
        })
    }

    fn is_geostationary(&self) -> bool {
        GEO_MEAN_MOTION.contains(&self.elements.mean_motion)
    }

    fn look(&self, station: &GroundStation, at: DateTime<Utc>) -> Result<RawSample, ScheduleError> {
        let naive = at.naive_utc();
        let minutes = self
            .elements
            .datetime_to_minutes_since_epoch(&naive)
            .map_err(|e| ScheduleError::Propagation(e.to_string()))?;
        let prediction = self
            .constants
            .propagate(minutes)
            .map_err(|e| ScheduleError::Propagation(e.to_string()))?;

        let gmst = sgp4::iau_epoch_to_sidereal_time(sgp4::julian_years_since_j2000(&naive));
        let sat = teme_to_ecef(prediction.position, gmst);
        let site = station.position_ecef_km();
        let dr = [sat[0] - site[0], sat[1] - site[1], sat[2] - site[2]];
        let range_km = norm(dr);

        let (east, north, up) = ecef_to_enu(dr, station);
        let elevation_deg = if range_km > 0.0 {
            (up / range_km).asin().to_degrees()
        } else {
            90.0
        };

        Ok(RawSample {
            azimuth_deg: east.atan2(north).to_degrees().rem_euclid(360.0),
            elevation_deg,
            range_km,
            altitude_km: norm(prediction.position) - EARTH_RADIUS_KM,
        })
    }

    fn sample(
        &self,
        station: &GroundStation,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawSample>, ScheduleError> {
        let count = (end - start).num_milliseconds() / SAMPLE_STEP_MS + 1;
        (0..count)
            .map(|i| self.look(station, start + Duration::milliseconds(i * SAMPLE_STEP_MS)))
            .collect()
    }
}

impl OrbitPropagator for Sgp4Propagator {
    fn schedule(
        &self,
        tle: &Tle,
        station: &GroundStation,
        window: Window,
        min_elevation_deg: f64,
    ) -> Result<Vec<PropagatedPass>, ScheduleError> {
        let orbit = Orbit::from_tle(tle)?;

        if orbit.is_geostationary() {
            let look = orbit.look(station, window.start)?;
            debug!(
                "Geostationary object at az {:.2} el {:.2}",
                look.azimuth_deg, look.elevation_deg
            );
            if look.elevation_deg < min_elevation_deg {
                return Ok(Vec::new());
            }
            return Ok(vec![PropagatedPass {
                start: window.start,
                end: window.end,
                samples: vec![look],
                geostationary: true,
            }]);
        }

        let step = Duration::seconds(SCAN_STEP_SECONDS);
        let mut passes = Vec::new();
        let mut aos: Option<DateTime<Utc>> = None;
        let mut max_el = f64::MIN;
        let mut cursor = window.start;

        while cursor <= window.end {
            let look = orbit.look(station, cursor)?;
            let visible = look.elevation_deg >= 0.0;

            match (aos, visible) {
                (None, true) => {
                    aos = Some(cursor);
                    max_el = look.elevation_deg;
                }
                (Some(_), true) => max_el = max_el.max(look.elevation_deg),
                (Some(start), false) => {
                    if max_el >= min_elevation_deg {
                        let end = cursor - step;
                        passes.push(PropagatedPass {
                            start,
                            end,
                            samples: orbit.sample(station, start, end)?,
                            geostationary: false,
                        });
                    }
                    aos = None;
                }
                (None, false) => {}
            }

            cursor += step;
        }

        if let Some(start) = aos {
            if max_el >= min_elevation_deg && window.end > start {
                passes.push(PropagatedPass {
                    start,
                    end: window.end,
                    samples: orbit.sample(station, start, window.end)?,
                    geostationary: false,
                });
            }
        }

        debug!("Found {} passes", passes.len());
        Ok(passes)
    }
}

fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Rotate a TEME position into the Earth-fixed frame by sidereal time
fn teme_to_ecef(p: [f64; 3], gmst: f64) -> [f64; 3] {
    let (s, c) = gmst.sin_cos();
    [p[0] * c + p[1] * s, -p[0] * s + p[1] * c, p[2]]
}

fn ecef_to_enu(dr: [f64; 3], station: &GroundStation) -> (f64, f64, f64) {
    let (sin_lat, cos_lat) = station.latitude_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = station.longitude_deg.to_radians().sin_cos();

    let east = -sin_lon * dr[0] + cos_lon * dr[1];
    let north = -sin_lat * cos_lon * dr[0] - sin_lat * sin_lon * dr[1] + cos_lat * dr[2];
    let up = cos_lat * cos_lon * dr[0] + cos_lat * sin_lon * dr[1] + sin_lat * dr[2];
    (east, north, up)
}
