//! Solar position (NOAA solar calculator equations) and daily path summary.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;

use super::GroundStation;
use crate::geometry::AzEl;

/// Scan step for sunrise/sunset detection
const PATH_SCAN_STEP_MIN: i64 = 1;

/// Sun's apparent elevation at geometric rise/set (refraction + radius)
const HORIZON_ELEVATION_DEG: f64 = -0.833;

/// Source of solar geometry
pub trait SunEphemeris: Send + Sync {
    /// Sun direction in the local horizon frame at `at`
    fn position(&self, station: &GroundStation, at: DateTime<Utc>) -> AzEl;

    /// Rise/set/noon summary for the solar day around `at`
    fn daily_path(&self, station: &GroundStation, at: DateTime<Utc>) -> DailySunPath {
        scan_daily_path(self, station, at)
    }
}

/// The sun's path across one solar day
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailySunPath {
    /// Absent when the sun never rises (polar night) or never sets (polar day)
    pub sunrise_azimuth_deg: Option<f64>,
    pub sunset_azimuth_deg: Option<f64>,
    pub noon_azimuth_deg: f64,
    pub noon_elevation_deg: f64,
}

impl DailySunPath {
    /// True if the day has both a sunrise and a sunset
    #[must_use]
    pub fn has_crossings(&self) -> bool {
        self.sunrise_azimuth_deg.is_some() && self.sunset_azimuth_deg.is_some()
    }
}

fn scan_daily_path<S: SunEphemeris + ?Sized>(
    sun: &S,
    station: &GroundStation,
    at: DateTime<Utc>,
) -> DailySunPath {
    let noon = approximate_solar_noon(station, at);
    let start = noon - Duration::hours(12);
    let steps = 24 * 60 / PATH_SCAN_STEP_MIN;

    let mut sunrise = None;
    let mut sunset = None;
    let mut best = sun.position(station, start);
    let mut prev = best;

    for i in 1..=steps {
        let t = start + Duration::minutes(i * PATH_SCAN_STEP_MIN);
        let pos = sun.position(station, t);

        let was_up = prev.elevation_deg >= HORIZON_ELEVATION_DEG;
        let is_up = pos.elevation_deg >= HORIZON_ELEVATION_DEG;
        if !was_up && is_up && sunrise.is_none() {
            sunrise = Some(pos.azimuth_deg);
        } else if was_up && !is_up {
            sunset = Some(prev.azimuth_deg);
        }

        if pos.elevation_deg > best.elevation_deg {
            best = pos;
        }
        prev = pos;
    }

    DailySunPath {
        sunrise_azimuth_deg: sunrise,
        sunset_azimuth_deg: sunset,
        noon_azimuth_deg: best.azimuth_deg,
        noon_elevation_deg: best.elevation_deg,
    }
}

/// Solar noon on the UTC date of `at`, ignoring the equation of time
fn approximate_solar_noon(station: &GroundStation, at: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = at
        .with_hour(0)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at);
    let offset_min = (720.0 - 4.0 * station.longitude_deg).round() as i64;
    midnight + Duration::minutes(offset_min)
}

/// NOAA solar position equations; accurate to well under 0.1° for current epochs
#[derive(Debug, Clone, Copy, Default)]
pub struct NoaaSun;

impl SunEphemeris for NoaaSun {
    fn position(&self, station: &GroundStation, at: DateTime<Utc>) -> AzEl {
        let unix = at.timestamp() as f64 + f64::from(at.timestamp_subsec_millis()) / 1000.0;
        let julian_day = unix / 86_400.0 + 2_440_587.5;
        let jc = (julian_day - 2_451_545.0) / 36_525.0;

        let mean_long = (280.466_46 + jc * (36_000.769_83 + jc * 0.000_303_2)).rem_euclid(360.0);
        let mean_anom = 357.529_11 + jc * (35_999.050_29 - 0.000_153_7 * jc);
        let ecc = 0.016_708_634 - jc * (0.000_042_037 + 0.000_000_126_7 * jc);

        let m = mean_anom.to_radians();
        let center = m.sin() * (1.914_602 - jc * (0.004_817 + 0.000_014 * jc))
            + (2.0 * m).sin() * (0.019_993 - 0.000_101 * jc)
            + (3.0 * m).sin() * 0.000_289;
        let true_long = mean_long + center;
        let omega = (125.04 - 1934.136 * jc).to_radians();
        let app_long = true_long - 0.005_69 - 0.004_78 * omega.sin();

        let mean_obliq =
            23.0 + (26.0 + (21.448 - jc * (46.815 + jc * (0.000_59 - jc * 0.001_813))) / 60.0) / 60.0;
        let obliq = (mean_obliq + 0.002_56 * omega.cos()).to_radians();

        let declination = (obliq.sin() * app_long.to_radians().sin()).asin();

        let var_y = (obliq / 2.0).tan().powi(2);
        let l0 = mean_long.to_radians();
        let eq_time_min = 4.0
            * (var_y * (2.0 * l0).sin() - 2.0 * ecc * m.sin()
                + 4.0 * ecc * var_y * m.sin() * (2.0 * l0).cos()
                - 0.5 * var_y * var_y * (4.0 * l0).sin()
                - 1.25 * ecc * ecc * (2.0 * m).sin())
            .to_degrees();

        let minutes_of_day = unix.rem_euclid(86_400.0) / 60.0;
        let true_solar_min =
            (minutes_of_day + eq_time_min + 4.0 * station.longitude_deg).rem_euclid(1440.0);
        let hour_angle = true_solar_min / 4.0 - 180.0;

        let lat = station.latitude_deg.to_radians();
        let cos_zenith = (lat.sin() * declination.sin()
            + lat.cos() * declination.cos() * hour_angle.to_radians().cos())
        .clamp(-1.0, 1.0);
        let zenith = cos_zenith.acos();

        let denom = lat.cos() * zenith.sin();
        let azimuth = if denom.abs() < 1e-12 {
            if lat >= 0.0 { 180.0 } else { 0.0 }
        } else {
            let cos_az = ((lat.sin() * zenith.cos() - declination.sin()) / denom).clamp(-1.0, 1.0);
            let base = cos_az.acos().to_degrees();
            if hour_angle > 0.0 {
                (base + 180.0).rem_euclid(360.0)
            } else {
                (540.0 - base).rem_euclid(360.0)
            }
        };

        AzEl::new(azimuth, 90.0 - zenith.to_degrees())
    }
}
