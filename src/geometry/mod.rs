//! # Pointing Geometry Module
//!
//! Mount-frame coordinate transform and mechanical-range azimuth handling.
//!
//! This module handles:
//! - Rotating a sky direction into the tilted, train-rotated mount frame
//! - Mapping azimuth sequences into the continuous ±270° mechanical range
//! - Unwrapping a single commanded azimuth across the 180° boundary

pub mod transform;
pub mod wrap;

use serde::{Deserialize, Serialize};

pub use transform::{CoordinateTransform, TiltTrainTransform};
pub use wrap::{normalize_mechanical, unwrap_azimuth, AngleWrap, ContinuousWrap, MECHANICAL_LIMIT_DEG};

/// A pointing direction in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AzEl {
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
}

impl AzEl {
    #[must_use]
    pub fn new(azimuth_deg: f64, elevation_deg: f64) -> Self {
        Self {
            azimuth_deg,
            elevation_deg,
        }
    }
}

/// Signed shortest difference `to - from`, in (-180, 180]
#[must_use]
pub fn angle_diff(from: f64, to: f64) -> f64 {
    let d = (to - from).rem_euclid(360.0);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_diff() {
        assert_eq!(angle_diff(10.0, 20.0), 10.0);
        assert_eq!(angle_diff(350.0, 10.0), 20.0);
        assert_eq!(angle_diff(10.0, 350.0), -20.0);
        assert_eq!(angle_diff(0.0, 180.0), 180.0);
        assert_eq!(angle_diff(-90.0, 270.0), 0.0);
    }
}
