mod cache;
mod conv;
mod dropout;
mod instance_norm;
mod layer;
mod residual;
mod upsample;

pub use cache::LayerCache;
pub use conv::Conv2d;
pub use dropout::Dropout;
pub use instance_norm::InstanceNorm;
pub use layer::Layer;
pub use residual::Residual;
pub use upsample::Upsample;
