use ndarray::{Array4, ArrayView4, Zip};

use super::LossFn;

/// Binary cross entropy computed from logits, numerically stable for large magnitudes.
#[derive(Default, Clone, Copy, Debug)]
pub struct SigmoidCrossEntropy;

impl SigmoidCrossEntropy {
    /// Returns a new `SigmoidCrossEntropy`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for SigmoidCrossEntropy {
    fn loss(&self, logits: ArrayView4<f32>, y: ArrayView4<f32>) -> f32 {
        let total: f32 = Zip::from(&logits)
            .and(&y)
            .map_collect(|&x, &y| x.max(0.) - x * y + (-x.abs()).exp().ln_1p())
            .sum();

        total / logits.len().max(1) as f32
    }

    fn loss_prime(&self, logits: ArrayView4<f32>, y: ArrayView4<f32>) -> Array4<f32> {
        let scale = 1.0 / logits.len().max(1) as f32;
        Zip::from(&logits)
            .and(&y)
            .map_collect(|&x, &y| (sigmoid(x) - y) * scale)
    }
}

fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}
