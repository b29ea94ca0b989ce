use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::error::{Diagnostic, GeostatError, Result};
use crate::spatial_database::{Location, SampleSet};
use crate::systems::OrdinaryKrigingSystem;
use crate::variography::model_variograms::VariogramModel;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub location: Location,
    pub predicted_value: f64,
    /// Kriging variance floored at zero.
    pub prediction_variance: f64,
    /// Kriging variance as solved.
    pub raw_variance: f64,
    pub diagnostic: Option<Diagnostic>,
}

/// Ordinary kriging predictor over a fixed sample set.
///
/// The bordered system is factored once in [`OrdinaryKriging::new`] and shared by every
/// prediction.
pub struct OrdinaryKriging {
    system: OrdinaryKrigingSystem,
    values: Vec<f64>,
}

impl OrdinaryKriging {
    pub fn new(samples: &SampleSet, model: &VariogramModel) -> Result<Self> {
        if samples.len() < 2 {
            return Err(GeostatError::InsufficientData {
                operation: "krige",
                required: 2,
                actual: samples.len(),
            });
        }

        Ok(Self {
            system: OrdinaryKrigingSystem::from_samples(samples, model)?,
            values: samples.values(),
        })
    }

    pub fn system(&self) -> &OrdinaryKrigingSystem {
        &self.system
    }

    /// Predicts a single target. `target_index` labels errors.
    pub fn predict(&self, target_index: usize, target: &Location) -> Result<PredictionResult> {
        if !target.is_finite() {
            return Err(GeostatError::InvalidParameter {
                name: "targets",
                reason: format!("target {} has a non-finite coordinate", target_index),
            });
        }

        let metric = self.system.model().metric;
        if let Some(i) = self
            .system
            .locations()
            .iter()
            .position(|l| metric.distance(l, target) == 0.0)
        {
            return Ok(PredictionResult {
                location: *target,
                predicted_value: self.values[i],
                prediction_variance: 0.0,
                raw_variance: 0.0,
                diagnostic: None,
            });
        }

        let weights = self.system.solve(target_index, target)?;
        let predicted_value = weights.estimate(&self.values);
        let raw_variance = weights.variance();

        let (prediction_variance, diagnostic) = clamp_variance(target_index, raw_variance);

        Ok(PredictionResult {
            location: *target,
            predicted_value,
            prediction_variance,
            raw_variance,
            diagnostic,
        })
    }

    /// Predicts every target in parallel. Results keep the order of `targets`.
    pub fn estimate(&self, targets: &[Location]) -> Vec<Result<PredictionResult>> {
        targets
            .par_iter()
            .enumerate()
            .map(|(i, target)| self.predict(i, target))
            .collect()
    }
}

/// Floors a negative kriging variance at zero and reports it.
fn clamp_variance(target_index: usize, raw_variance: f64) -> (f64, Option<Diagnostic>) {
    if raw_variance < 0.0 {
        log::warn!(
            "negative kriging variance {:e} at target {} clamped to zero",
            raw_variance,
            target_index
        );
        (
            0.0,
            Some(Diagnostic::NonPositiveVarianceClamped { raw_variance }),
        )
    } else {
        (raw_variance, None)
    }
}

/// Ordinary kriging of `targets` from `samples` under `model`.
///
/// The outer error covers problems with the whole batch (too few observations, invalid
/// model). Each target carries its own result, so a singular target does not abort the
/// others.
pub fn krige(
    samples: &SampleSet,
    model: &VariogramModel,
    targets: &[Location],
) -> Result<Vec<Result<PredictionResult>>> {
    let kriging = OrdinaryKriging::new(samples, model)?;
    let results = kriging.estimate(targets);

    let failed = results.iter().filter(|r| r.is_err()).count();
    log::debug!(
        "kriged {} targets from {} observations ({} failed)",
        targets.len(),
        samples.len(),
        failed
    );

    Ok(results)
}
