use ndarray::Array4;
use rand::Rng;

use super::{Mode, ParamKind, TensorInfo, layers::{Layer, LayerCache}};
use crate::{MlErr, Result};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
///
/// The model doesn't own its parameters, it reads them from a flat slice where every layer owns
/// the contiguous range starting at its offset.
#[derive(Clone, Debug, PartialEq)]
pub struct Sequential {
    layers: Vec<Layer>,
    offsets: Vec<usize>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        let layers: Vec<_> = layers.into_iter().collect();
        let mut offsets = Vec::with_capacity(layers.len() + 1);
        let mut offset = 0;
        offsets.push(offset);

        for layer in &layers {
            offset += layer.size();
            offsets.push(offset);
        }

        Self { layers, offsets }
    }

    /// Returns the amount of parameters in the model.
    pub fn size(&self) -> usize {
        self.offsets.last().copied().unwrap_or_default()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Lists every parameter tensor of the model in parameter order, named by the index path of
    /// the layer that owns it (`3.weight`, `5.1.bias`, ...).
    pub fn tensors(&self) -> Vec<TensorInfo> {
        let mut tensors = Vec::new();

        for (i, (layer, &offset)) in self.layers.iter().zip(&self.offsets).enumerate() {
            match layer {
                Layer::Conv2d(conv) => {
                    let weights_end = offset + conv.size() - conv.out_channels();
                    tensors.push(TensorInfo {
                        name: format!("{i}.weight"),
                        shape: conv.weight_shape(),
                        range: offset..weights_end,
                        kind: ParamKind::Weight,
                    });
                    tensors.push(TensorInfo {
                        name: format!("{i}.bias"),
                        shape: conv.bias_shape(),
                        range: weights_end..offset + conv.size(),
                        kind: ParamKind::Bias,
                    });
                }
                Layer::Residual(residual) => {
                    tensors.extend(residual.body().tensors().into_iter().map(|inner| TensorInfo {
                        name: format!("{i}.{}", inner.name),
                        range: inner.range.start + offset..inner.range.end + offset,
                        ..inner
                    }));
                }
                _ => {}
            }
        }

        tensors
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `x` - The input batch.
    /// * `mode` - Whether the pass is part of training or of inference.
    /// * `rng` - The source of randomness for stochastic layers.
    /// * `record` - Whether to keep the per layer caches for a backward pass.
    ///
    /// # Returns
    /// The prediction for the given input and, if recorded, one cache per layer.
    pub fn forward<R: Rng>(
        &self,
        params: &[f32],
        mut x: Array4<f32>,
        mode: Mode,
        rng: &mut R,
        record: bool,
    ) -> Result<(Array4<f32>, Vec<LayerCache>)> {
        self.check_params(params.len())?;
        let mut caches = Vec::with_capacity(if record { self.layers.len() } else { 0 });

        for (i, layer) in self.layers.iter().enumerate() {
            let params = &params[self.offsets[i]..self.offsets[i + 1]];
            let (y, cache) = layer.forward(params, x, mode, rng, record)?;
            caches.extend(cache);
            x = y;
        }

        Ok((x, caches))
    }

    /// Makes a backward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `grad` - Where to accumulate the parameter gradient, or `None` to only propagate.
    /// * `caches` - The caches recorded by the matching forward pass.
    /// * `d` - The gradient of the loss with respect to the output.
    ///
    /// # Returns
    /// The gradient of the loss with respect to the input.
    pub fn backward(
        &self,
        params: &[f32],
        mut grad: Option<&mut [f32]>,
        caches: Vec<LayerCache>,
        mut d: Array4<f32>,
    ) -> Result<Array4<f32>> {
        self.check_params(params.len())?;
        if let Some(grad) = grad.as_deref() {
            self.check_params(grad.len())?;
        }

        if caches.len() != self.layers.len() {
            return Err(MlErr::SizeMismatch {
                what: "recorded layer caches",
                got: caches.len(),
                expected: self.layers.len(),
            });
        }

        for (i, (layer, cache)) in self.layers.iter().zip(caches).enumerate().rev() {
            let range = self.offsets[i]..self.offsets[i + 1];
            let grad = grad.as_deref_mut().map(|grad| &mut grad[range.clone()]);
            d = layer.backward(&params[range], grad, cache, d)?;
        }

        Ok(d)
    }

    fn check_params(&self, len: usize) -> Result<()> {
        if len != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "parameters",
                got: len,
                expected: self.size(),
            });
        }

        Ok(())
    }
}
