mod adapter;
mod model;
mod training;

pub use adapter::{Adapter, IMAGE_CHANNELS};
pub use model::ModelConfig;
pub use training::{GanMode, TestConfig, TrainingConfig};
