//! Sky-to-mount coordinate transform.
//!
//! The mount's azimuth/elevation axes ride on a train axis that turns the
//! whole pedestal about the vertical, and the pedestal may be tilted about
//! its cross axis. A direction is expressed in that frame by first rotating
//! out the train angle, then the tilt.

use super::AzEl;

/// Maps a sky direction into mount-frame azimuth/elevation
#[cfg_attr(test, mockall::automock)]
pub trait CoordinateTransform: Send + Sync {
    /// # Arguments
    ///
    /// * `target` - Direction in the local horizon frame
    /// * `tilt_deg` - Fixed mount tilt about the cross axis
    /// * `train_deg` - Train axis angle
    ///
    /// # Returns
    ///
    /// * `AzEl` - Direction in the mount frame, azimuth in [0, 360)
    fn transform(&self, target: AzEl, tilt_deg: f64, train_deg: f64) -> AzEl;
}

/// Rigid-body rotation by train, then tilt
#[derive(Debug, Clone, Copy, Default)]
pub struct TiltTrainTransform;

impl CoordinateTransform for TiltTrainTransform {
    fn transform(&self, target: AzEl, tilt_deg: f64, train_deg: f64) -> AzEl {
        let (az, el) = (target.azimuth_deg.to_radians(), target.elevation_deg.to_radians());

        // east, north, up
        let e = el.cos() * az.sin();
        let n = el.cos() * az.cos();
        let u = el.sin();

        let (sin_t, cos_t) = train_deg.to_radians().sin_cos();
        let x = e * cos_t - n * sin_t;
        let y = e * sin_t + n * cos_t;

        let (sin_k, cos_k) = tilt_deg.to_radians().sin_cos();
        let y2 = y * cos_k + u * sin_k;
        let z2 = -y * sin_k + u * cos_k;

        AzEl {
            azimuth_deg: x.atan2(y2).to_degrees().rem_euclid(360.0),
            elevation_deg: z2.clamp(-1.0, 1.0).asin().to_degrees(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_identity_without_offsets() {
        let out = TiltTrainTransform.transform(AzEl::new(123.0, 45.0), 0.0, 0.0);
        assert!(close(out.azimuth_deg, 123.0));
        assert!(close(out.elevation_deg, 45.0));
    }

    #[test]
    fn test_train_subtracts_from_azimuth() {
        let out = TiltTrainTransform.transform(AzEl::new(100.0, 30.0), 0.0, 40.0);
        assert!(close(out.azimuth_deg, 60.0));
        assert!(close(out.elevation_deg, 30.0));

        let out = TiltTrainTransform.transform(AzEl::new(10.0, 30.0), 0.0, 40.0);
        assert!(close(out.azimuth_deg, 330.0));
    }

    #[test]
    fn test_tilt_moves_zenith_toward_horizon() {
        let out = TiltTrainTransform.transform(AzEl::new(0.0, 90.0), 90.0, 0.0);
        assert!(close(out.elevation_deg, 0.0));
        assert!(close(out.azimuth_deg, 0.0));
    }

    #[test]
    fn test_tilt_preserves_cross_axis_direction() {
        // the tilt axis itself (train-frame east) does not move
        let out = TiltTrainTransform.transform(AzEl::new(90.0, 0.0), 20.0, 0.0);
        assert!(close(out.azimuth_deg, 90.0));
        assert!(close(out.elevation_deg, 0.0));
    }
}
