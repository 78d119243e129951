use rand::Rng;
use rand_distr::{Distribution, Normal, NormalError};

use super::TensorInit;
use crate::arch::TensorInfo;

/// Weights drawn from `Normal(0, std_dev)`.
#[derive(Debug, Clone)]
pub struct NormalInit {
    tensor: TensorInfo,
    distribution: Normal<f32>,
}

impl NormalInit {
    /// # Returns
    /// An error if `std_dev` is negative or not finite.
    pub fn new(tensor: TensorInfo, std_dev: f32) -> Result<Self, NormalError> {
        Ok(Self {
            tensor,
            distribution: Normal::new(0., std_dev)?,
        })
    }
}

impl<R: Rng> TensorInit<R> for NormalInit {
    fn tensor(&self) -> &TensorInfo {
        &self.tensor
    }

    fn fill(&self, rng: &mut R, out: &mut [f32]) {
        out.iter_mut()
            .for_each(|w| *w = self.distribution.sample(rng));
    }
}
