use log::trace;
use rand::Rng;

use super::TensorInit;
use crate::{MlErr, Result};

/// One initializer per tensor, filling a flat parameter vector of `size` values.
pub struct InitPlan<R: Rng> {
    inits: Vec<Box<dyn TensorInit<R>>>,
    size: usize,
}

impl<R: Rng> InitPlan<R> {
    /// Creates a new `InitPlan`.
    ///
    /// # Arguments
    /// * `inits` - The initializers, one for each tensor.
    /// * `size` - The length of the parameter vector.
    ///
    /// # Returns
    /// An error unless the tensors tile `0..size` in order, without gaps or overlaps.
    pub fn new(inits: Vec<Box<dyn TensorInit<R>>>, size: usize) -> Result<Self> {
        let mut offset = 0;
        for init in &inits {
            let tensor = init.tensor();
            if tensor.range.start != offset {
                return Err(MlErr::Init(format!(
                    "tensor {} starts at {} instead of {offset}",
                    tensor.name, tensor.range.start
                )));
            }
            offset = tensor.range.end;
        }

        if offset != size {
            return Err(MlErr::SizeMismatch {
                what: "initialized parameters",
                got: offset,
                expected: size,
            });
        }

        Ok(Self { inits, size })
    }

    /// Draws a fresh parameter vector.
    pub fn sample(&self, rng: &mut R) -> Vec<f32> {
        let mut params = vec![0.; self.size];
        for init in &self.inits {
            let tensor = init.tensor();
            trace!(tensor = tensor.name.as_str(), len = tensor.len(); "initializing tensor");
            init.fill(rng, &mut params[tensor.range.clone()]);
        }

        params
    }
}
