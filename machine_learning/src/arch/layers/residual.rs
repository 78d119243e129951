use ndarray::Array4;
use rand::Rng;

use super::LayerCache;
use crate::{
    MlErr, Result,
    arch::{Mode, Sequential},
};

/// A block that adds its input to the output of its body: `y = x + body(x)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Residual {
    body: Sequential,
}

impl Residual {
    pub fn new(body: Sequential) -> Self {
        Self { body }
    }

    pub fn body(&self) -> &Sequential {
        &self.body
    }

    pub fn size(&self) -> usize {
        self.body.size()
    }

    pub fn forward<R: Rng>(
        &self,
        params: &[f32],
        x: Array4<f32>,
        mode: Mode,
        rng: &mut R,
        record: bool,
    ) -> Result<(Array4<f32>, Option<LayerCache>)> {
        let (y, caches) = self.body.forward(params, x.clone(), mode, rng, record)?;
        if y.dim() != x.dim() {
            return Err(MlErr::ShapeMismatch {
                what: "residual body output",
                got: y.shape().to_vec(),
                expected: x.shape().to_vec(),
            });
        }

        Ok((x + &y, record.then_some(LayerCache::Residual { caches })))
    }

    pub fn backward(
        &self,
        params: &[f32],
        grad: Option<&mut [f32]>,
        caches: Vec<LayerCache>,
        d: Array4<f32>,
    ) -> Result<Array4<f32>> {
        let d_body = self.body.backward(params, grad, caches, d.clone())?;
        Ok(d + &d_body)
    }
}
