use ndarray::prelude::*;
use rand::Rng;

use super::LayerCache;
use crate::arch::Mode;

/// Inverted dropout: zeroes activations with probability `prob` while training and rescales the
/// survivors, acting as the identity during inference.
#[derive(Clone, Debug, PartialEq)]
pub struct Dropout {
    prob: f32,
}

impl Dropout {
    pub fn new(prob: f32) -> Self {
        Self {
            prob: prob.clamp(0., 1.),
        }
    }

    pub fn prob(&self) -> f32 {
        self.prob
    }

    pub fn forward<R: Rng>(
        &self,
        x: Array4<f32>,
        mode: Mode,
        rng: &mut R,
        record: bool,
    ) -> (Array4<f32>, Option<LayerCache>) {
        if mode == Mode::Inference || self.prob == 0. {
            return (x, record.then_some(LayerCache::Dropout { mask: None }));
        }

        let keep = 1. - self.prob;
        let scale = if keep > 0. { 1. / keep } else { 0. };
        let mask = Array4::from_shape_simple_fn(x.dim(), || {
            if rng.random::<f32>() < keep { scale } else { 0. }
        });

        let y = x * &mask;
        (y, record.then_some(LayerCache::Dropout { mask: Some(mask) }))
    }

    pub fn backward(&self, mask: Option<Array4<f32>>, d: Array4<f32>) -> Array4<f32> {
        match mask {
            Some(mask) => d * &mask,
            None => d,
        }
    }
}
