use ndarray::{Array4, ArrayView4};

use super::LossFn;

/// Mean absolute error loss function.
#[derive(Default, Clone, Copy, Debug)]
pub struct Mae;

impl Mae {
    /// Returns a new `Mae`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Mae {
    fn loss(&self, y_pred: ArrayView4<f32>, y: ArrayView4<f32>) -> f32 {
        (&y_pred - &y).mapv(f32::abs).mean().unwrap_or_default()
    }

    // The subgradient at zero is taken to be zero.
    fn loss_prime(&self, y_pred: ArrayView4<f32>, y: ArrayView4<f32>) -> Array4<f32> {
        let scale = 1.0 / y_pred.len().max(1) as f32;
        (&y_pred - &y).mapv(|x| if x == 0.0 { 0.0 } else { x.signum() * scale })
    }
}
