use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::spatial_database::Location;

pub mod anisotropy;

pub use anisotropy::Anisotropy;

/// How separation between two locations is measured.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Euclidean distance on (x, y), time is ignored.
    #[default]
    Spatial,
    /// Euclidean distance on (x, y, time_scale * t). Missing times count as zero.
    SpaceTime { time_scale: f64 },
}

/// Separation between two locations, split into its spatial and (scaled) time parts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Separation {
    pub spatial: Vector2<f64>,
    pub time: f64,
}

impl Separation {
    pub fn norm(&self) -> f64 {
        (self.spatial.norm_squared() + self.time * self.time).sqrt()
    }
}

impl DistanceMetric {
    #[inline(always)]
    pub fn separation(&self, from: &Location, to: &Location) -> Separation {
        let time = match self {
            DistanceMetric::Spatial => 0.0,
            DistanceMetric::SpaceTime { time_scale } => time_scale * from.time_offset_to(to),
        };

        Separation {
            spatial: from.offset_to(to),
            time,
        }
    }

    #[inline(always)]
    pub fn distance(&self, from: &Location, to: &Location) -> f64 {
        self.separation(from, to).norm()
    }
}
