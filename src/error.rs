use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GeostatError>;

/// Errors raised by the estimation pipeline.
///
/// Estimation and fitting errors are fatal to the stage that raised them. Kriging errors
/// are reported per target. Cross-validation errors abort the whole run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeostatError {
    #[error("{operation}: insufficient data, need at least {required} observations, got {actual}")]
    InsufficientData {
        operation: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("degenerate binning (bin width {bin_width}, cutoff {cutoff}): {reason}")]
    DegenerateBinning {
        reason: &'static str,
        bin_width: f64,
        cutoff: f64,
    },

    #[error("singular kriging system for target {target_index} (pivot {pivot:e})")]
    SingularKrigingSystem { target_index: usize, pivot: f64 },

    #[error("fold {fold} leaves {training} training observations, need at least 2")]
    InsufficientFoldData { fold: usize, training: usize },

    #[error("invalid observation {index}: {reason}")]
    InvalidObservation { index: usize, reason: &'static str },

    #[error("observations {first} and {second} share the location ({x}, {y})")]
    DuplicateLocation {
        first: usize,
        second: usize,
        x: f64,
        y: f64,
    },

    #[error("invalid variogram model parameter '{parameter}' = {value}: {reason}")]
    InvalidModel {
        parameter: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("csv error: {0}")]
    Csv(String),
}

impl From<csv::Error> for GeostatError {
    fn from(err: csv::Error) -> Self {
        GeostatError::Csv(err.to_string())
    }
}

/// Non-fatal conditions reported next to a successful result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// The optimizer could not lower the objective; the initial guess was returned.
    FitDidNotImprove { initial_cost: f64, final_cost: f64 },
    /// The kriging variance came out negative and was floored at zero.
    NonPositiveVarianceClamped { raw_variance: f64 },
}
