pub mod ordinary_kriging;

pub use ordinary_kriging::{krige, OrdinaryKriging, PredictionResult};
