pub mod ok_system;
pub mod system_builder;

pub use ok_system::{KrigingWeights, OrdinaryKrigingSystem};
