use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};

use crate::error::{GeostatError, Result};

/// Geometric anisotropy.
///
/// `angle` is the direction of the major axis in degrees, counter-clockwise from the
/// x axis, folded into [0, 180). `ratio` is minor range / major range, in (0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anisotropy {
    pub angle: f64,
    pub ratio: f64,
}

impl Anisotropy {
    pub fn new(angle: f64, ratio: f64) -> Result<Self> {
        if !angle.is_finite() {
            return Err(GeostatError::InvalidModel {
                parameter: "anisotropy.angle",
                value: angle,
                reason: "must be finite",
            });
        }
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(GeostatError::InvalidModel {
                parameter: "anisotropy.ratio",
                value: ratio,
                reason: "must lie in (0, 1]",
            });
        }

        Ok(Self {
            angle: normalize_angle(angle),
            ratio,
        })
    }

    /// Maps a separation vector onto the equivalent isotropic distance.
    /// The vector is rotated into the major/minor frame and the minor component is
    /// stretched by `1 / ratio`.
    #[inline(always)]
    pub fn isotropic_distance(&self, h: &Vector2<f64>) -> f64 {
        let local = Rotation2::new(-self.angle.to_radians()) * *h;
        Vector2::new(local.x, local.y / self.ratio).norm()
    }
}

/// Folds an angle in degrees into [0, 180).
pub fn normalize_angle(angle: f64) -> f64 {
    let folded = angle.rem_euclid(180.0);
    // rem_euclid can round up to the modulus for tiny negative inputs
    if folded >= 180.0 {
        0.0
    } else {
        folded
    }
}
