use serde::{Deserialize, Serialize};

use crate::error::{GeostatError, Result};
use crate::geometry::{Anisotropy, DistanceMetric, Separation};
use crate::spatial_database::Location;

pub mod iso_exponential;
pub mod iso_fitter;
pub mod iso_gaussian;
pub mod iso_nugget;
pub mod iso_spherical;

use iso_exponential::IsoExponential;
use iso_gaussian::IsoGaussian;
use iso_nugget::IsoNugget;
use iso_spherical::IsoSpherical;

/// A single isotropic structure evaluated on a scalar lag.
pub trait IsoVariogramModel {
    /// Contribution of the structure to the sill.
    fn c_0(&self) -> f64;
    fn variogram(&self, h: f64) -> f64;

    fn covariogram(&self, h: f64) -> f64 {
        self.c_0() - self.variogram(h)
    }
}

/// Theoretical variogram families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariogramFamily {
    Spherical,
    Exponential,
    Gaussian,
}

impl VariogramFamily {
    pub const ALL: [VariogramFamily; 3] = [
        VariogramFamily::Spherical,
        VariogramFamily::Exponential,
        VariogramFamily::Gaussian,
    ];

    /// Semivariance at isotropic lag `h`: zero at the origin, nugget plus the family's
    /// structure elsewhere.
    #[inline(always)]
    pub fn evaluate(&self, h: f64, nugget: f64, partial_sill: f64, range: f64) -> f64 {
        if h <= 0.0 {
            return 0.0;
        }

        let structure = match self {
            VariogramFamily::Spherical => IsoSpherical::new(range, partial_sill).variogram(h),
            VariogramFamily::Exponential => IsoExponential::new(range, partial_sill).variogram(h),
            VariogramFamily::Gaussian => IsoGaussian::new(range, partial_sill).variogram(h),
        };

        IsoNugget::new(nugget).variogram(h) + structure
    }
}

/// Fitted (or user supplied) variogram model.
///
/// The sill is `nugget + partial_sill`. When `anisotropy` is set, separations are
/// mapped to an isotropic lag before the family is evaluated, so `range` is the range
/// along the major axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariogramModel {
    pub family: VariogramFamily,
    pub nugget: f64,
    pub partial_sill: f64,
    pub range: f64,
    pub anisotropy: Option<Anisotropy>,
    pub metric: DistanceMetric,
}

impl VariogramModel {
    pub fn new(family: VariogramFamily, nugget: f64, partial_sill: f64, range: f64) -> Result<Self> {
        let model = Self {
            family,
            nugget,
            partial_sill,
            range,
            anisotropy: None,
            metric: DistanceMetric::Spatial,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn with_anisotropy(mut self, angle: f64, ratio: f64) -> Result<Self> {
        self.anisotropy = Some(Anisotropy::new(angle, ratio)?);
        Ok(self)
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn sill(&self) -> f64 {
        self.nugget + self.partial_sill
    }

    pub fn is_anisotropic(&self) -> bool {
        self.anisotropy.is_some()
    }

    /// Checks parameter bounds: nugget >= 0, partial sill >= 0, range > 0.
    pub fn validate(&self) -> Result<()> {
        if !(self.nugget.is_finite() && self.nugget >= 0.0) {
            return Err(GeostatError::InvalidModel {
                parameter: "nugget",
                value: self.nugget,
                reason: "must be finite and non-negative",
            });
        }
        if !(self.partial_sill.is_finite() && self.partial_sill >= 0.0) {
            return Err(GeostatError::InvalidModel {
                parameter: "partial_sill",
                value: self.partial_sill,
                reason: "must be finite and non-negative",
            });
        }
        if !(self.range.is_finite() && self.range > 0.0) {
            return Err(GeostatError::InvalidModel {
                parameter: "range",
                value: self.range,
                reason: "must be finite and positive",
            });
        }
        if let Some(aniso) = self.anisotropy {
            Anisotropy::new(aniso.angle, aniso.ratio)?;
        }
        if let DistanceMetric::SpaceTime { time_scale } = self.metric {
            if !(time_scale.is_finite() && time_scale >= 0.0) {
                return Err(GeostatError::InvalidModel {
                    parameter: "metric.time_scale",
                    value: time_scale,
                    reason: "must be finite and non-negative",
                });
            }
        }
        Ok(())
    }

    /// Isotropic lag equivalent to `separation` under this model.
    #[inline(always)]
    pub fn effective_distance(&self, separation: &Separation) -> f64 {
        match &self.anisotropy {
            Some(aniso) => {
                let d = aniso.isotropic_distance(&separation.spatial);
                (d * d + separation.time * separation.time).sqrt()
            }
            None => separation.norm(),
        }
    }

    /// Semivariance at an isotropic lag.
    #[inline(always)]
    pub fn variogram(&self, h: f64) -> f64 {
        self.family
            .evaluate(h, self.nugget, self.partial_sill, self.range)
    }

    pub fn covariogram(&self, h: f64) -> f64 {
        self.sill() - self.variogram(h)
    }

    /// Semivariance between two locations.
    #[inline(always)]
    pub fn variogram_between(&self, a: &Location, b: &Location) -> f64 {
        let separation = self.metric.separation(a, b);
        self.variogram(self.effective_distance(&separation))
    }
}
