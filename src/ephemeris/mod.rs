//! # Ephemeris Module
//!
//! Where things are in the sky, as seen from the ground station.
//!
//! This module handles:
//! - TLE parsing and SGP4 propagation into above-horizon passes
//! - Solar position and the day's sunrise/sunset geometry
//!
//! Both sit behind traits so the orchestrator can be driven by fixed
//! geometry in tests.

pub mod orbit;
pub mod sun;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SiteConfig;
use crate::error::ScheduleError;
use crate::geometry::AzEl;

pub use orbit::{OrbitPropagator, Sgp4Propagator, Tle};
pub use sun::{DailySunPath, NoaaSun, SunEphemeris};

/// Observer location on the WGS-84 ellipsoid
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GroundStation {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

impl From<&SiteConfig> for GroundStation {
    fn from(site: &SiteConfig) -> Self {
        Self {
            latitude_deg: site.latitude_deg,
            longitude_deg: site.longitude_deg,
            altitude_m: site.altitude_m,
        }
    }
}

impl GroundStation {
    #[must_use]
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
        }
    }

    /// Earth-fixed position in km
    #[must_use]
    pub fn position_ecef_km(&self) -> [f64; 3] {
        const WGS84_A_KM: f64 = 6378.137;
        const WGS84_E2: f64 = 0.006_694_379_990_14;

        let (sin_lat, cos_lat) = self.latitude_deg.to_radians().sin_cos();
        let (sin_lon, cos_lon) = self.longitude_deg.to_radians().sin_cos();
        let prime_vertical = WGS84_A_KM / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
        let h = self.altitude_m / 1000.0;

        [
            (prime_vertical + h) * cos_lat * cos_lon,
            (prime_vertical + h) * cos_lat * sin_lon,
            (prime_vertical * (1.0 - WGS84_E2) + h) * sin_lat,
        ]
    }
}

/// One propagator output sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawSample {
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub range_km: f64,
    pub altitude_km: f64,
}

impl RawSample {
    #[must_use]
    pub fn az_el(&self) -> AzEl {
        AzEl::new(self.azimuth_deg, self.elevation_deg)
    }
}

/// An above-horizon window with samples every [`SAMPLE_STEP_MS`] from `start`
#[derive(Debug, Clone, PartialEq)]
pub struct PropagatedPass {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub samples: Vec<RawSample>,
    /// Fixed look angle: one sample covering the whole window
    pub geostationary: bool,
}

/// Cadence of pass samples; matches the satellite-track protocol step
pub const SAMPLE_STEP_MS: i64 = crate::icd::protocol::SAT_TRACK_STEP_MS as i64;

/// Requested prediction window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// # Errors
    ///
    /// Returns `ScheduleError::InvalidWindow` if `end` is not after `start`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ScheduleError> {
        if end <= start {
            return Err(ScheduleError::InvalidWindow(format!(
                "{} is not after {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }
}
