use ndarray::Array4;
use rand::Rng;

use super::{Conv2d, Dropout, InstanceNorm, LayerCache, Residual, Upsample};
use crate::{
    MlErr, Result,
    arch::{Mode, Sequential, activations::ActFn},
};

#[derive(Clone, Debug, PartialEq)]
pub enum Layer {
    Conv2d(Conv2d),
    InstanceNorm(InstanceNorm),
    Activation(ActFn),
    Dropout(Dropout),
    Upsample(Upsample),
    Residual(Residual),
}

impl Layer {
    pub fn conv2d(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
    ) -> Self {
        Self::Conv2d(Conv2d::new(
            in_channels,
            out_channels,
            kernel,
            stride,
            padding,
        ))
    }

    pub fn instance_norm() -> Self {
        Self::InstanceNorm(InstanceNorm::new())
    }

    pub fn activation(act_fn: ActFn) -> Self {
        Self::Activation(act_fn)
    }

    pub fn dropout(prob: f32) -> Self {
        Self::Dropout(Dropout::new(prob))
    }

    pub fn upsample(factor: usize) -> Self {
        Self::Upsample(Upsample::new(factor))
    }

    pub fn residual<I>(body: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self::Residual(Residual::new(Sequential::new(body)))
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        match self {
            Layer::Conv2d(l) => l.size(),
            Layer::Residual(l) => l.size(),
            Layer::InstanceNorm(_) | Layer::Activation(_) | Layer::Dropout(_) | Layer::Upsample(_) => 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Conv2d(_) => "conv2d",
            Layer::InstanceNorm(_) => "instance_norm",
            Layer::Activation(_) => "activation",
            Layer::Dropout(_) => "dropout",
            Layer::Upsample(_) => "upsample",
            Layer::Residual(_) => "residual",
        }
    }

    /// Makes a forward pass through the layer.
    ///
    /// # Arguments
    /// * `params` - This layer's slice of parameters.
    /// * `x` - The input batch.
    /// * `mode` - Whether the pass is part of training or of inference.
    /// * `rng` - The source of randomness for dropout.
    /// * `record` - Whether to keep what the backward pass needs.
    ///
    /// # Returns
    /// The output of the layer and its cache if `record` was set.
    pub fn forward<R: Rng>(
        &self,
        params: &[f32],
        x: Array4<f32>,
        mode: Mode,
        rng: &mut R,
        record: bool,
    ) -> Result<(Array4<f32>, Option<LayerCache>)> {
        match self {
            Layer::Conv2d(l) => l.forward(params, x, record),
            Layer::InstanceNorm(l) => Ok(l.forward(x, record)),
            Layer::Activation(act_fn) => {
                let y = x.mapv(|z| act_fn.f(z));
                Ok((y, record.then_some(LayerCache::Activation { z: x })))
            }
            Layer::Dropout(l) => Ok(l.forward(x, mode, rng, record)),
            Layer::Upsample(l) => Ok((l.forward(x), record.then_some(LayerCache::Upsample))),
            Layer::Residual(l) => l.forward(params, x, mode, rng, record),
        }
    }

    /// Makes a backward pass through the layer.
    ///
    /// # Arguments
    /// * `params` - This layer's slice of parameters.
    /// * `grad` - Where to accumulate the parameter gradient, if anywhere.
    /// * `cache` - What this layer recorded during the forward pass.
    /// * `d` - The gradient of the loss with respect to this layer's output.
    ///
    /// # Returns
    /// The gradient of the loss with respect to this layer's input.
    pub fn backward(
        &self,
        params: &[f32],
        grad: Option<&mut [f32]>,
        cache: LayerCache,
        mut d: Array4<f32>,
    ) -> Result<Array4<f32>> {
        match (self, cache) {
            (Layer::Conv2d(l), LayerCache::Conv2d { cols, input_dim }) => {
                l.backward(params, grad, cols, input_dim, d)
            }
            (Layer::InstanceNorm(l), LayerCache::InstanceNorm { xhat, inv_std }) => {
                Ok(l.backward(xhat, inv_std, d))
            }
            (Layer::Activation(act_fn), LayerCache::Activation { z }) => {
                d.zip_mut_with(&z, |d, &z| *d *= act_fn.df(z));
                Ok(d)
            }
            (Layer::Dropout(l), LayerCache::Dropout { mask }) => Ok(l.backward(mask, d)),
            (Layer::Upsample(l), LayerCache::Upsample) => Ok(l.backward(d)),
            (Layer::Residual(l), LayerCache::Residual { caches }) => l.backward(params, grad, caches, d),
            (layer, _) => Err(MlErr::CacheMismatch {
                layer: layer.kind(),
            }),
        }
    }
}
