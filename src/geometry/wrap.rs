//! Mechanical azimuth range handling.
//!
//! The azimuth axis turns through ±270°, so a pass that crosses north can be
//! followed without a cable-wrap reversal as long as the commanded sequence
//! stays continuous and inside that range.

use tracing::warn;

use super::{angle_diff, AzEl};

/// Mechanical azimuth limit either side of zero
pub const MECHANICAL_LIMIT_DEG: f64 = 270.0;

/// Maps a pass's azimuth sequence into the mechanical range
pub trait AngleWrap: Send + Sync {
    /// Map azimuths given in [0, 360) into one continuous ±270° sequence
    fn wrap(&self, samples: &[AzEl]) -> Vec<AzEl>;
}

/// Nearest-equivalent unwrap, then a whole-turn shift if the result leaves
/// the mechanical range
#[derive(Debug, Clone, Copy)]
pub struct ContinuousWrap {
    pub limit_deg: f64,
}

impl Default for ContinuousWrap {
    fn default() -> Self {
        Self {
            limit_deg: MECHANICAL_LIMIT_DEG,
        }
    }
}

impl AngleWrap for ContinuousWrap {
    fn wrap(&self, samples: &[AzEl]) -> Vec<AzEl> {
        let Some(first) = samples.first() else {
            return Vec::new();
        };

        let mut out = Vec::with_capacity(samples.len());
        let mut prev = normalize_signed(first.azimuth_deg);
        out.push(AzEl::new(prev, first.elevation_deg));

        for sample in &samples[1..] {
            prev += angle_diff(prev, sample.azimuth_deg);
            out.push(AzEl::new(prev, sample.elevation_deg));
        }

        let (min, max) = out.iter().fold((f64::MAX, f64::MIN), |(lo, hi), s| {
            (lo.min(s.azimuth_deg), hi.max(s.azimuth_deg))
        });

        let shift = if max > self.limit_deg && min - 360.0 >= -self.limit_deg {
            -360.0
        } else if min < -self.limit_deg && max + 360.0 <= self.limit_deg {
            360.0
        } else {
            0.0
        };

        if max - min > 2.0 * self.limit_deg {
            warn!(
                "Azimuth sweep of {:.1} deg exceeds the mechanical range; clamping",
                max - min
            );
        }

        out.iter_mut().for_each(|s| {
            s.azimuth_deg = (s.azimuth_deg + shift).clamp(-self.limit_deg, self.limit_deg);
        });
        out
    }
}

/// Fold any angle into (-180, 180]
fn normalize_signed(angle: f64) -> f64 {
    let a = angle.rem_euclid(360.0);
    if a > 180.0 {
        a - 360.0
    } else {
        a
    }
}

/// Fold any angle into the mechanical range [-270, 270]
///
/// Angles already inside the range are returned unchanged.
#[must_use]
pub fn normalize_mechanical(angle: f64) -> f64 {
    let mut a = angle;
    while a > MECHANICAL_LIMIT_DEG {
        a -= 360.0;
    }
    while a < -MECHANICAL_LIMIT_DEG {
        a += 360.0;
    }
    a
}

/// Make a [0, 360) commanded azimuth continuous across north
///
/// Values above 180° map to their negative equivalent. Applying it twice
/// changes nothing.
#[must_use]
pub fn unwrap_azimuth(azimuth_deg: f64) -> f64 {
    if azimuth_deg > 180.0 {
        azimuth_deg - 360.0
    } else {
        azimuth_deg
    }
}
