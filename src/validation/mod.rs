pub mod cross_validation;

pub use cross_validation::{cross_validate, CrossValidationParams, Residual, ValidationReport};
