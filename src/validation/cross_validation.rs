use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::error::{GeostatError, Result};
use crate::estimators::OrdinaryKriging;
use crate::spatial_database::SampleSet;
use crate::variography::model_variograms::VariogramModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossValidationParams {
    /// Number of folds. Values at or above the number of observations mean leave-one-out.
    pub folds: usize,
    /// Seed of the fold shuffle.
    pub seed: u64,
}

impl Default for CrossValidationParams {
    fn default() -> Self {
        Self { folds: 10, seed: 0 }
    }
}

impl CrossValidationParams {
    pub fn leave_one_out() -> Self {
        Self {
            folds: usize::MAX,
            ..Default::default()
        }
    }

    pub fn with_folds(mut self, folds: usize) -> Self {
        self.folds = folds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Held-out prediction for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Residual {
    /// Position of the observation in the sample set.
    pub index: usize,
    pub observed: f64,
    pub predicted: f64,
    pub variance: f64,
}

impl Residual {
    /// `observed - predicted`
    pub fn error(&self) -> f64 {
        self.observed - self.predicted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Folds actually used, `n` for leave-one-out.
    pub folds: usize,
    pub rmse: f64,
    /// RMSE as a percentage of the observed mean. NaN when that mean is zero.
    pub nrmse_percent: f64,
    /// `1 - rmse / persistence_rmse`, exactly zero for a constant field.
    pub skill_ratio: f64,
    /// RMSE of always predicting the observed mean.
    pub persistence_rmse: f64,
    /// One entry per observation, in sample order.
    pub residuals: Vec<Residual>,
}

impl ValidationReport {
    fn from_residuals(folds: usize, residuals: Vec<Residual>) -> Self {
        let n = residuals.len() as f64;
        let mean = residuals.iter().map(|r| r.observed).sum::<f64>() / n;

        let rmse = (residuals.iter().map(|r| r.error().powi(2)).sum::<f64>() / n).sqrt();
        // the rounded mean of a constant field need not equal the constant
        let constant = residuals
            .first()
            .map_or(true, |first| residuals.iter().all(|r| r.observed == first.observed));
        let persistence_rmse = if constant {
            0.0
        } else {
            (residuals
                .iter()
                .map(|r| (r.observed - mean).powi(2))
                .sum::<f64>()
                / n)
                .sqrt()
        };

        let nrmse_percent = if mean == 0.0 {
            f64::NAN
        } else {
            rmse / mean * 100.0
        };
        let skill_ratio = if persistence_rmse == 0.0 {
            0.0
        } else {
            1.0 - rmse / persistence_rmse
        };

        Self {
            folds,
            rmse,
            nrmse_percent,
            skill_ratio,
            persistence_rmse,
            residuals,
        }
    }
}

/// Splits `0..n` into `folds` groups. Leave-one-out when `folds >= n`, otherwise a
/// seeded shuffle dealt round-robin.
pub fn assign_folds(n: usize, folds: usize, seed: u64) -> Vec<Vec<usize>> {
    if folds >= n {
        return (0..n).map(|i| vec![i]).collect();
    }

    let mut order = (0..n).collect::<Vec<_>>();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let mut assignment = vec![Vec::with_capacity(n / folds + 1); folds];
    for (position, index) in order.into_iter().enumerate() {
        assignment[position % folds].push(index);
    }
    assignment
}

/// k-fold cross validation of `model` on `samples`.
///
/// The model is held fixed; each fold is kriged from the remaining observations.
/// Any failing fold or target aborts the run.
pub fn cross_validate(
    samples: &SampleSet,
    model: &VariogramModel,
    params: &CrossValidationParams,
) -> Result<ValidationReport> {
    if params.folds < 2 {
        return Err(GeostatError::InvalidParameter {
            name: "folds",
            reason: format!("need at least 2 folds, got {}", params.folds),
        });
    }
    if samples.is_empty() {
        return Err(GeostatError::InsufficientData {
            operation: "cross_validate",
            required: 3,
            actual: 0,
        });
    }
    model.validate()?;

    let n = samples.len();
    let folds = assign_folds(n, params.folds, params.seed);

    for (fold, test) in folds.iter().enumerate() {
        let training = n - test.len();
        if training < 2 {
            return Err(GeostatError::InsufficientFoldData { fold, training });
        }
    }

    log::debug!(
        "cross validating {} observations over {} folds",
        n,
        folds.len()
    );

    let fold_residuals = folds
        .par_iter()
        .map(|test| predict_fold(samples, model, test))
        .collect::<Result<Vec<_>>>()?;

    let mut residuals = fold_residuals.into_iter().flatten().collect::<Vec<_>>();
    residuals.sort_by_key(|r| r.index);

    let report = ValidationReport::from_residuals(folds.len(), residuals);
    log::debug!(
        "cross validation: rmse {:.4}, nrmse {:.2}%, skill {:.4}",
        report.rmse,
        report.nrmse_percent,
        report.skill_ratio
    );

    Ok(report)
}

fn predict_fold(samples: &SampleSet, model: &VariogramModel, test: &[usize]) -> Result<Vec<Residual>> {
    let training = (0..samples.len())
        .filter(|i| !test.contains(i))
        .collect::<Vec<_>>();
    let kriging = OrdinaryKriging::new(&samples.subset(&training), model)?;

    test.iter()
        .map(|&index| {
            let prediction = kriging.predict(index, samples.location(index))?;
            Ok(Residual {
                index,
                observed: samples.value(index),
                predicted: prediction.predicted_value,
                variance: prediction.prediction_variance,
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use rand::Rng;

    use super::*;
    use crate::spatial_database::Observation;
    use crate::variography::model_variograms::VariogramFamily;

    fn random_samples(n: usize, seed: u64, field: impl Fn(f64, f64) -> f64) -> SampleSet {
        let mut rng = StdRng::seed_from_u64(seed);
        SampleSet::new(
            (0..n)
                .map(|_| {
                    let x = rng.gen_range(0.0..100.0);
                    let y = rng.gen_range(0.0..100.0);
                    Observation::new((x, y), field(x, y))
                })
                .collect(),
        )
        .unwrap()
    }

    fn model() -> VariogramModel {
        VariogramModel::new(VariogramFamily::Exponential, 0.1, 50.0, 60.0).unwrap()
    }

    #[test]
    fn ten_folds_on_ten_observations_is_leave_one_out() {
        let samples = random_samples(10, 3, |x, y| 500.0 + x - 0.5 * y);
        let params = CrossValidationParams::default();

        let report = cross_validate(&samples, &model(), &params).unwrap();
        assert_eq!(report.folds, 10);
        assert_eq!(report.residuals.len(), 10);
        for (i, r) in report.residuals.iter().enumerate() {
            assert_eq!(r.index, i);
            assert_relative_eq!(r.observed, samples.value(i));
        }

        let loo = cross_validate(&samples, &model(), &CrossValidationParams::leave_one_out()).unwrap();
        assert_eq!(report, loo);
    }

    #[test]
    fn flat_field_has_zero_skill() {
        let samples = random_samples(12, 5, |_, _| 5.0);
        let report = cross_validate(&samples, &model(), &CrossValidationParams::default()).unwrap();
        assert_eq!(report.persistence_rmse, 0.0);
        assert_eq!(report.skill_ratio, 0.0);
        assert!(report.rmse < 1e-9);
    }

    #[test]
    fn flat_field_of_inexact_values_has_zero_skill() {
        for value in [0.1, 512.7, 700.3] {
            let samples = random_samples(10, 5, |_, _| value);
            let report =
                cross_validate(&samples, &model(), &CrossValidationParams::default()).unwrap();
            assert_eq!(report.persistence_rmse, 0.0);
            assert_eq!(report.skill_ratio, 0.0);
        }

        let residuals = (0..7)
            .map(|index| Residual {
                index,
                observed: 700.3,
                predicted: 700.3 + 1e-12,
                variance: 0.0,
            })
            .collect();
        let report = ValidationReport::from_residuals(7, residuals);
        assert_eq!(report.persistence_rmse, 0.0);
        assert_eq!(report.skill_ratio, 0.0);
    }

    #[test]
    fn smooth_field_beats_persistence() {
        let samples = random_samples(60, 9, |x, y| 300.0 + 2.0 * x + y);
        let params = CrossValidationParams::default().with_folds(5).with_seed(42);
        let report = cross_validate(&samples, &model(), &params).unwrap();

        assert_eq!(report.folds, 5);
        assert_eq!(report.residuals.len(), 60);
        assert!(report.skill_ratio > 0.0 && report.skill_ratio <= 1.0);
        assert!(report.nrmse_percent > 0.0);
    }

    #[test]
    fn metrics_by_hand() {
        let residuals = [(1.0, 1.0), (2.0, 2.0), (3.0, 5.0)]
            .iter()
            .enumerate()
            .map(|(index, &(observed, predicted))| Residual {
                index,
                observed,
                predicted,
                variance: 0.0,
            })
            .collect();
        let report = ValidationReport::from_residuals(3, residuals);

        let rmse = (4.0f64 / 3.0).sqrt();
        let persistence = (2.0f64 / 3.0).sqrt();
        assert_relative_eq!(report.rmse, rmse);
        assert_relative_eq!(report.nrmse_percent, rmse / 2.0 * 100.0);
        assert_relative_eq!(report.persistence_rmse, persistence);
        assert_relative_eq!(report.skill_ratio, 1.0 - rmse / persistence);
    }

    #[test]
    fn zero_mean_gives_nan_nrmse() {
        let residuals = vec![
            Residual {
                index: 0,
                observed: -1.0,
                predicted: 0.0,
                variance: 0.0,
            },
            Residual {
                index: 1,
                observed: 1.0,
                predicted: 0.0,
                variance: 0.0,
            },
        ];
        let report = ValidationReport::from_residuals(2, residuals);
        assert!(report.nrmse_percent.is_nan());
        assert_relative_eq!(report.skill_ratio, 0.0);
    }

    #[test]
    fn fold_assignment_is_reproducible() {
        let a = assign_folds(25, 4, 7);
        let b = assign_folds(25, 4, 7);
        assert_eq!(a, b);

        let mut all = a.iter().flatten().copied().collect::<Vec<_>>();
        all.sort_unstable();
        assert_eq!(all, (0..25).collect::<Vec<_>>());
        assert!(a.iter().all(|f| f.len() == 6 || f.len() == 7));

        assert_eq!(assign_folds(3, 3, 99), vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn same_seed_same_report() {
        let samples = random_samples(30, 1, |x, y| (x * 0.1).sin() + y * 0.01);
        let params = CrossValidationParams::default().with_folds(3).with_seed(17);
        let a = cross_validate(&samples, &model(), &params).unwrap();
        let b = cross_validate(&samples, &model(), &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn too_few_folds() {
        let samples = random_samples(10, 1, |x, _| x);
        let params = CrossValidationParams::default().with_folds(1);
        assert!(matches!(
            cross_validate(&samples, &model(), &params),
            Err(GeostatError::InvalidParameter { name: "folds", .. })
        ));
    }

    #[test]
    fn folds_need_two_training_observations() {
        let samples = random_samples(2, 1, |x, _| x);
        assert!(matches!(
            cross_validate(&samples, &model(), &CrossValidationParams::default()),
            Err(GeostatError::InsufficientFoldData {
                fold: 0,
                training: 1
            })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn skill_never_exceeds_one(seed in 0u64..1000, folds in 2usize..12) {
            let samples = random_samples(15, seed, |x, y| x * y / 100.0);
            let params = CrossValidationParams::default().with_folds(folds).with_seed(seed);
            let report = cross_validate(&samples, &model(), &params).unwrap();
            prop_assert!(report.skill_ratio <= 1.0);
            prop_assert!(report.rmse >= 0.0);
            prop_assert_eq!(report.residuals.len(), 15);
        }
    }
}
