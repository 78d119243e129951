use log::debug;
use ndarray::Array4;
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{Mode, Sequential, TensorInfo, layers::LayerCache};
use crate::{MlErr, Result, initialization};

/// A named model together with the parameters it owns.
///
/// Networks are frozen by toggling `trainable`: a frozen network still propagates gradients to
/// its input but accumulates none for its own parameters.
#[derive(Debug, Clone)]
pub struct Network {
    name: String,
    arch: Sequential,
    tensors: Vec<TensorInfo>,
    params: Vec<f32>,
    trainable: bool,
    rng: StdRng,
}

impl Network {
    /// Creates a new `Network` from already existing parameters.
    ///
    /// # Arguments
    /// * `name` - The unique name of the network.
    /// * `arch` - The model.
    /// * `params` - The flat parameter vector, it must match `arch.size()`.
    /// * `rng` - The source of randomness for stochastic layers.
    pub fn new(name: impl Into<String>, arch: Sequential, params: Vec<f32>, rng: StdRng) -> Result<Self> {
        if params.len() != arch.size() {
            return Err(MlErr::SizeMismatch {
                what: "network parameters",
                got: params.len(),
                expected: arch.size(),
            });
        }

        Ok(Self {
            name: name.into(),
            tensors: arch.tensors(),
            arch,
            params,
            trainable: true,
            rng,
        })
    }

    /// Creates a new `Network` with weights drawn from `Normal(0, std_dev)` and zero biases.
    pub fn initialize<R: Rng>(
        name: impl Into<String>,
        arch: Sequential,
        std_dev: f32,
        rng: &mut R,
    ) -> Result<Self> {
        let name = name.into();
        let size = arch.size();
        let params = initialization::normal_weights(&arch, std_dev)?.sample(rng);

        debug!(network = name.as_str(), size = size; "initialized network parameters");
        Self::new(name, arch, params, StdRng::from_rng(rng))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arch(&self) -> &Sequential {
        &self.arch
    }

    /// The named parameter tensors of this network, in parameter order.
    pub fn tensors(&self) -> &[TensorInfo] {
        &self.tensors
    }

    pub fn size(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    /// Makes an unrecorded forward pass.
    pub fn forward(&mut self, x: Array4<f32>, mode: Mode) -> Result<Array4<f32>> {
        let (y, _) = self.arch.forward(&self.params, x, mode, &mut self.rng, false)?;
        Ok(y)
    }

    /// Makes a training forward pass keeping what `backward` needs.
    pub(crate) fn forward_recorded(&mut self, x: Array4<f32>) -> Result<(Array4<f32>, Vec<LayerCache>)> {
        self.arch
            .forward(&self.params, x, Mode::Training, &mut self.rng, true)
    }

    pub(crate) fn backward(
        &self,
        grad: Option<&mut [f32]>,
        caches: Vec<LayerCache>,
        d: Array4<f32>,
    ) -> Result<Array4<f32>> {
        self.arch.backward(&self.params, grad, caches, d)
    }
}
