use rand::Rng;

use super::TensorInit;
use crate::arch::{ParamKind, TensorInfo};

/// Convolution biases start at a constant, zero for every network in this crate.
#[derive(Debug, Clone)]
pub struct BiasInit {
    tensor: TensorInfo,
    value: f32,
}

impl BiasInit {
    /// Zeroes the bias `tensor`.
    ///
    /// # Returns
    /// `None` if `tensor` is not a bias.
    pub fn zeros(tensor: TensorInfo) -> Option<Self> {
        (tensor.kind == ParamKind::Bias).then_some(Self { tensor, value: 0. })
    }
}

impl<R: Rng> TensorInit<R> for BiasInit {
    fn tensor(&self) -> &TensorInfo {
        &self.tensor
    }

    fn fill(&self, _rng: &mut R, out: &mut [f32]) {
        out.fill(self.value);
    }
}
