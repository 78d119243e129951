mod bce;
mod gan;
mod loss_fn;
mod mae;
mod mse;

pub use bce::SigmoidCrossEntropy;
pub use gan::{DiscriminatorLoss, GanLoss, Loss, cycle_loss, discriminator_loss, generator_loss, identity_loss};
pub use loss_fn::LossFn;
pub use mae::Mae;
pub use mse::Mse;
