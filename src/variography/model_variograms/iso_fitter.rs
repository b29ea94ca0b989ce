use std::cell::Cell;

use itertools::izip;
use nalgebra::Vector2;
use ordered_float::OrderedFloat;
use rmpfit::{MPConfig, MPFitter, MPPar, MPResult};
use serde::{Deserialize, Serialize};

use crate::error::{Diagnostic, GeostatError, Result};
use crate::geometry::anisotropy::normalize_angle;
use crate::geometry::Anisotropy;
use crate::variography::experimental_variogram::EmpiricalVariogram;

use super::{VariogramFamily, VariogramModel};

// smallest anisotropy ratio the optimizer may reach
const MIN_RATIO: f64 = 1e-6;

/// Optimizer settings for [`fit_variogram`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitParams {
    /// Stop once the relative decrease of the weighted sum of squares falls below this.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Fit angle and ratio too. Implied when the initial guess is anisotropic.
    pub anisotropic: bool,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 200,
            anisotropic: false,
        }
    }
}

impl FitParams {
    pub fn anisotropic(mut self) -> Self {
        self.anisotropic = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    /// Weighted sum of squares of the initial guess.
    pub initial_cost: f64,
    /// Weighted sum of squares of the returned model.
    pub final_cost: f64,
    /// Objective evaluations spent by the optimizer.
    pub evaluations: usize,
    pub diagnostic: Option<Diagnostic>,
}

impl FitDiagnostics {
    pub fn improved(&self) -> bool {
        self.diagnostic.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
struct FitPoint {
    lag: f64,
    direction: Option<f64>,
    gamma: f64,
    sqrt_weight: f64,
}

/// Weighted least squares fit of a [`VariogramModel`] to an empirical variogram.
///
/// Minimises `sum(w_k * (gamma_k - f(d_k))^2)` with Cressie weights
/// `w_k = pair_count_k / d_k^2` using bounded Levenberg-Marquardt. The parameter
/// vector is `[nugget, partial_sill, range]`, followed by `[angle, ratio]` when fitting
/// anisotropy.
pub struct VariogramFitter {
    points: Vec<FitPoint>,
    template: VariogramModel,
    anisotropic: bool,
    mppar_params: Vec<MPPar>,
    params: FitParams,
    evaluations: Cell<usize>,
}

impl VariogramFitter {
    pub fn new(
        empirical: &EmpiricalVariogram,
        initial_guess: &VariogramModel,
        params: FitParams,
    ) -> Result<Self> {
        initial_guess.validate()?;

        let points = empirical
            .bins
            .iter()
            .filter(|b| b.lag_distance > 0.0 && b.gamma.is_finite() && b.pair_count > 0)
            .map(|b| FitPoint {
                lag: b.lag_distance,
                direction: b.direction,
                gamma: b.gamma,
                sqrt_weight: (b.pair_count as f64).sqrt() / b.lag_distance,
            })
            .collect::<Vec<_>>();

        if points.is_empty() {
            return Err(GeostatError::InsufficientData {
                operation: "fit_variogram",
                required: 1,
                actual: 0,
            });
        }

        let anisotropic = params.anisotropic || initial_guess.is_anisotropic();
        if anisotropic && points.iter().any(|p| p.direction.is_none()) {
            return Err(GeostatError::InvalidParameter {
                name: "anisotropic",
                reason: "anisotropic fitting needs a directional empirical variogram".into(),
            });
        }

        let max_lag = points
            .iter()
            .map(|p| OrderedFloat(p.lag))
            .max()
            .map_or(1.0, |l| l.0);

        let mut mppar_params = vec![
            // nugget
            MPPar {
                limited_low: true,
                limit_low: 0.0,
                ..Default::default()
            },
            // partial sill
            MPPar {
                limited_low: true,
                limit_low: 0.0,
                ..Default::default()
            },
            // range
            MPPar {
                limited_low: true,
                limit_low: f64::EPSILON * max_lag,
                ..Default::default()
            },
        ];
        if anisotropic {
            // angle
            mppar_params.push(MPPar {
                limited_low: true,
                limit_low: 0.0,
                limited_up: true,
                limit_up: 180.0,
                ..Default::default()
            });
            // ratio
            mppar_params.push(MPPar {
                limited_low: true,
                limit_low: MIN_RATIO,
                limited_up: true,
                limit_up: 1.0,
                ..Default::default()
            });
        }

        let mut template = *initial_guess;
        template.metric = empirical.metric;

        Ok(Self {
            points,
            template,
            anisotropic,
            mppar_params,
            params,
            evaluations: Cell::new(0),
        })
    }

    fn params_from_model(&self, model: &VariogramModel) -> Vec<f64> {
        let mut params = vec![model.nugget, model.partial_sill, model.range];
        if self.anisotropic {
            let aniso = model.anisotropy.unwrap_or(Anisotropy {
                angle: 0.0,
                ratio: 1.0,
            });
            params.push(aniso.angle);
            params.push(aniso.ratio.max(MIN_RATIO));
        }
        params
    }

    pub fn model_from_slice(&self, params: &[f64]) -> VariogramModel {
        let mut model = self.template;
        model.nugget = params[0].max(0.0);
        model.partial_sill = params[1].max(0.0);
        model.range = params[2].max(f64::MIN_POSITIVE);
        if self.anisotropic {
            model.anisotropy = Some(Anisotropy {
                angle: normalize_angle(params[3]),
                ratio: params[4].clamp(MIN_RATIO, 1.0),
            });
        }
        model
    }

    #[inline(always)]
    fn predicted(&self, model: &VariogramModel, point: &FitPoint) -> f64 {
        match (model.anisotropy, point.direction) {
            (Some(aniso), Some(direction)) => {
                let rad = direction.to_radians();
                let h = Vector2::new(rad.cos(), rad.sin()) * point.lag;
                model.variogram(aniso.isotropic_distance(&h))
            }
            _ => model.variogram(point.lag),
        }
    }

    /// Weighted sum of squared residuals of `model`.
    pub fn cost(&self, model: &VariogramModel) -> f64 {
        self.points
            .iter()
            .map(|p| {
                let r = p.sqrt_weight * (p.gamma - self.predicted(model, p));
                r * r
            })
            .sum()
    }

    /// Runs the optimizer from the template model.
    ///
    /// Never fails: when the optimizer errors out or cannot lower the cost the initial
    /// guess comes back unchanged with [`Diagnostic::FitDidNotImprove`].
    pub fn fit(&self) -> (VariogramModel, FitDiagnostics) {
        let initial = self.template;
        let initial_cost = self.cost(&initial);
        let mut params = self.params_from_model(&initial);

        let config = MPConfig {
            ftol: self.params.tolerance,
            max_iter: self.params.max_iterations,
            ..Default::default()
        };

        self.evaluations.set(0);
        let fitted = match self.mpfit(
            params.as_mut_slice(),
            Some(self.mppar_params.as_slice()),
            &config,
        ) {
            Ok(_) => Some(self.model_from_slice(&params)),
            Err(err) => {
                log::warn!("variogram optimizer failed: {}", err);
                None
            }
        };
        let evaluations = self.evaluations.get();

        let candidate = fitted
            .filter(|m| m.validate().is_ok())
            .map(|m| (self.cost(&m), m))
            .filter(|(cost, _)| cost.is_finite() && *cost < initial_cost);

        match candidate {
            Some((final_cost, model)) => {
                log::debug!(
                    "fitted {:?} variogram: cost {:.6e} -> {:.6e} in {} evaluations",
                    model.family,
                    initial_cost,
                    final_cost,
                    evaluations
                );
                (
                    model,
                    FitDiagnostics {
                        initial_cost,
                        final_cost,
                        evaluations,
                        diagnostic: None,
                    },
                )
            }
            None => {
                let final_cost = fitted.map_or(initial_cost, |m| self.cost(&m));
                log::warn!(
                    "{:?} variogram fit did not improve on the initial guess (cost {:.6e})",
                    initial.family,
                    initial_cost
                );
                (
                    initial,
                    FitDiagnostics {
                        initial_cost,
                        final_cost: initial_cost,
                        evaluations,
                        diagnostic: Some(Diagnostic::FitDidNotImprove {
                            initial_cost,
                            final_cost,
                        }),
                    },
                )
            }
        }
    }
}

impl MPFitter for VariogramFitter {
    fn eval(&self, params: &[f64], deviates: &mut [f64]) -> MPResult<()> {
        self.evaluations.set(self.evaluations.get() + 1);
        let model = self.model_from_slice(params);

        for (d, p) in izip!(deviates.iter_mut(), self.points.iter()) {
            *d = p.sqrt_weight * (p.gamma - self.predicted(&model, p));
        }

        Ok(())
    }

    fn number_of_points(&self) -> usize {
        self.points.len()
    }
}

/// Fits `initial_guess` (family, starting parameters and optional anisotropy) to
/// `empirical`. See [`VariogramFitter`].
pub fn fit_variogram(
    empirical: &EmpiricalVariogram,
    initial_guess: &VariogramModel,
    params: &FitParams,
) -> Result<(VariogramModel, FitDiagnostics)> {
    let fitter = VariogramFitter::new(empirical, initial_guess, *params)?;
    Ok(fitter.fit())
}

/// Fits every family from the same starting parameters and keeps the lowest cost.
pub fn fit_best_family(
    empirical: &EmpiricalVariogram,
    initial_guess: &VariogramModel,
    params: &FitParams,
) -> Result<(VariogramModel, FitDiagnostics)> {
    let mut best: Option<(VariogramModel, FitDiagnostics)> = None;

    for family in VariogramFamily::ALL {
        let mut guess = *initial_guess;
        guess.family = family;

        let (model, diagnostics) = fit_variogram(empirical, &guess, params)?;
        if best
            .as_ref()
            .map_or(true, |(_, d)| diagnostics.final_cost < d.final_cost)
        {
            best = Some((model, diagnostics));
        }
    }

    best.ok_or(GeostatError::InsufficientData {
        operation: "fit_best_family",
        required: 1,
        actual: 0,
    })
}
