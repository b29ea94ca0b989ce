pub mod error;
pub mod estimators;
pub mod geometry;
pub mod spatial_database;
pub mod systems;
pub mod validation;
pub mod variography;

pub use error::{Diagnostic, GeostatError, Result};
pub use estimators::krige;
pub use validation::cross_validate;
pub use variography::experimental_variogram::estimate_variogram;
pub use variography::model_variograms::iso_fitter::fit_variogram;

pub mod prelude {

    pub mod re_exports {
        pub use nalgebra;
    }

    pub use crate::error::{Diagnostic, GeostatError, Result};
    pub use crate::estimators::{krige, OrdinaryKriging, PredictionResult};
    pub use crate::geometry::{Anisotropy, DistanceMetric};
    pub use crate::spatial_database::{Location, Observation, SampleSet};
    pub use crate::systems::{KrigingWeights, OrdinaryKrigingSystem};
    pub use crate::validation::{
        cross_validate, CrossValidationParams, Residual, ValidationReport,
    };
    pub use crate::variography::experimental_variogram::{
        estimate_variogram, DirectionSectors, EmpiricalVariogram, SemivarianceBin,
        VariogramParams,
    };
    pub use crate::variography::model_variograms::iso_fitter::{
        fit_best_family, fit_variogram, FitDiagnostics, FitParams,
    };
    pub use crate::variography::model_variograms::{VariogramFamily, VariogramModel};
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    use crate::prelude::*;

    /// Clear sky level plus a smooth cloud field and sensor noise, in W/m².
    fn synthetic_irradiance(n: usize, seed: u64) -> SampleSet {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 5.0).unwrap();
        SampleSet::new(
            (0..n)
                .map(|_| {
                    let x: f64 = rng.gen_range(0.0..50.0);
                    let y: f64 = rng.gen_range(0.0..50.0);
                    let cloud = 150.0 * (x / 12.0).sin() * (y / 15.0).cos();
                    Observation::new((x, y), 700.0 + cloud + noise.sample(&mut rng))
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn full_pipeline() {
        let samples = synthetic_irradiance(150, 2024);

        let empirical = estimate_variogram(&samples, &VariogramParams::default()).unwrap();
        assert!(!empirical.is_empty());

        let guess = VariogramModel::new(VariogramFamily::Exponential, 10.0, 5000.0, 10.0).unwrap();
        let (model, diagnostics) = fit_variogram(&empirical, &guess, &FitParams::default()).unwrap();
        assert!(model.validate().is_ok());
        assert!(diagnostics.final_cost <= diagnostics.initial_cost);

        let targets = [Location::new(25.0, 25.0), Location::new(10.0, 40.0)];
        for result in krige(&samples, &model, &targets).unwrap() {
            let result = result.unwrap();
            assert!(result.predicted_value.is_finite());
            assert!(result.prediction_variance >= 0.0);
        }

        let report = cross_validate(&samples, &model, &CrossValidationParams::default()).unwrap();
        assert_eq!(report.residuals.len(), samples.len());
        assert!(report.skill_ratio <= 1.0);
        assert!(report.skill_ratio > 0.0);
        assert!(report.nrmse_percent.is_finite());
    }
}
