pub mod experimental_variogram;
pub mod model_variograms;
