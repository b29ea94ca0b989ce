use nalgebra::{DMatrix, DVector, Dyn, LU};
use serde::{Deserialize, Serialize};

use crate::error::{GeostatError, Result};
use crate::spatial_database::{Location, SampleSet};
use crate::variography::model_variograms::VariogramModel;

use super::system_builder::{OKBuilder, OKPointBuilder};

/// Pivots smaller than this, relative to the largest matrix entry, mark the system singular.
pub const PIVOT_TOLERANCE: f64 = 1e-12;

/// Solution of the bordered system for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KrigingWeights {
    pub weights: Vec<f64>,
    pub lagrange_multiplier: f64,
    /// Semivariance between each conditioning location and the target.
    pub target_semivariances: Vec<f64>,
}

impl KrigingWeights {
    pub fn weight_sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn estimate(&self, values: &[f64]) -> f64 {
        self.weights.iter().zip(values).map(|(w, v)| w * v).sum()
    }

    /// Ordinary kriging variance before clamping, `Σ w_i γ0_i + μ`.
    pub fn variance(&self) -> f64 {
        self.weights
            .iter()
            .zip(self.target_semivariances.iter())
            .map(|(w, g)| w * g)
            .sum::<f64>()
            + self.lagrange_multiplier
    }
}

/// LU factored ordinary kriging system for a fixed set of conditioning locations.
///
/// Building costs O(n²) memory and O(n³) time. Every [`OrdinaryKrigingSystem::solve`]
/// reuses the factorization and costs O(n²).
pub struct OrdinaryKrigingSystem {
    locations: Vec<Location>,
    model: VariogramModel,
    lu: LU<f64, Dyn, Dyn>,
    min_pivot: f64,
    singular: bool,
}

impl OrdinaryKrigingSystem {
    pub fn new(locations: Vec<Location>, model: &VariogramModel) -> Result<Self> {
        if locations.is_empty() {
            return Err(GeostatError::InsufficientData {
                operation: "ordinary_kriging_system",
                required: 1,
                actual: 0,
            });
        }
        model.validate()?;

        let mut mat = DMatrix::zeros(0, 0);
        OKPointBuilder::build_variogram_mat(&mut mat, &locations, model);

        let scale = mat.amax();
        let lu = mat.lu();
        let min_pivot = lu
            .u()
            .diagonal()
            .iter()
            .map(|p| p.abs())
            .fold(f64::INFINITY, f64::min);

        let singular = !(min_pivot > PIVOT_TOLERANCE * scale);
        if singular {
            log::warn!(
                "ordinary kriging system of {} locations is singular (min pivot {:e})",
                locations.len(),
                min_pivot
            );
        }

        Ok(Self {
            locations,
            model: *model,
            lu,
            min_pivot,
            singular,
        })
    }

    pub fn from_samples(samples: &SampleSet, model: &VariogramModel) -> Result<Self> {
        Self::new(samples.locations(), model)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn is_singular(&self) -> bool {
        self.singular
    }

    /// Smallest absolute pivot of the factorization.
    pub fn min_pivot(&self) -> f64 {
        self.min_pivot
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn model(&self) -> &VariogramModel {
        &self.model
    }

    /// Solves for the weights of target `target_index` located at `target`.
    ///
    /// `target_index` only labels the error.
    pub fn solve(&self, target_index: usize, target: &Location) -> Result<KrigingWeights> {
        let singular = || GeostatError::SingularKrigingSystem {
            target_index,
            pivot: self.min_pivot,
        };

        if self.singular {
            return Err(singular());
        }

        let n = self.locations.len();
        let mut rhs = DVector::zeros(0);
        OKPointBuilder::build_variogram_vec(&mut rhs, &self.locations, target, &self.model);

        let solution = self.lu.solve(&rhs).ok_or_else(singular)?;
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(singular());
        }

        Ok(KrigingWeights {
            weights: solution.rows(0, n).iter().copied().collect(),
            lagrange_multiplier: solution[n],
            target_semivariances: rhs.rows(0, n).iter().copied().collect(),
        })
    }
}
