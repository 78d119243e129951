use std::collections::BTreeMap;

use crate::{MlErr, Result, arch::Network, autodiff::Gradients};

/// The first and second moment estimates Adam keeps for one network.
#[derive(Debug, Clone, PartialEq)]
pub struct Moments {
    pub m: Vec<f32>,
    pub v: Vec<f32>,
}

impl Moments {
    fn zeros(len: usize) -> Self {
        Self {
            m: vec![0.; len],
            v: vec![0.; len],
        }
    }
}

/// Adam optimizer shared by a group of networks.
///
/// Every registered network gets its own moment estimates, while the bias correction powers are
/// shared and advance once per `apply` call.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    epsilon: f32,
    slots: BTreeMap<String, Moments>,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            epsilon,
            slots: BTreeMap::new(),
        }
    }

    /// Makes this optimizer responsible for `network`, allocating its moment estimates.
    ///
    /// # Returns
    /// An error if a network with the same name was already registered.
    pub fn register(&mut self, network: &Network) -> Result<()> {
        if self.slots.contains_key(network.name()) {
            return Err(MlErr::DuplicateNetwork(network.name().to_owned()));
        }

        self.slots
            .insert(network.name().to_owned(), Moments::zeros(network.size()));
        Ok(())
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Changes the learning rate used from the next `apply` on.
    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    /// The accumulated powers `beta1^t` and `beta2^t`.
    pub fn beta_powers(&self) -> (f32, f32) {
        (self.beta1_t, self.beta2_t)
    }

    pub fn set_beta_powers(&mut self, (beta1_t, beta2_t): (f32, f32)) {
        self.beta1_t = beta1_t;
        self.beta2_t = beta2_t;
    }

    pub fn moments(&self, name: &str) -> Option<&Moments> {
        self.slots.get(name)
    }

    pub fn moments_mut(&mut self, name: &str) -> Option<&mut Moments> {
        self.slots.get_mut(name)
    }

    /// Takes a step on every trainable network in `networks` that has a gradient in `grads`.
    ///
    /// # Returns
    /// The amount of networks updated, or an error if one of them isn't registered or its
    /// gradient has the wrong size.
    pub fn apply<'n, I>(&mut self, grads: &Gradients, networks: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'n mut Network>,
    {
        let mut updates = Vec::new();

        for network in networks {
            if !network.is_trainable() {
                continue;
            }

            let Some(grad) = grads.get(network.name()) else {
                continue;
            };

            if grad.len() != network.size() {
                return Err(MlErr::SizeMismatch {
                    what: "gradient",
                    got: grad.len(),
                    expected: network.size(),
                });
            }

            if !self.slots.contains_key(network.name()) {
                return Err(MlErr::UnknownNetwork(network.name().to_owned()));
            }

            updates.push((network, grad));
        }

        if updates.is_empty() {
            return Ok(0);
        }

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        for (network, grad) in &mut updates {
            let Some(Moments { m, v }) = self.slots.get_mut(network.name()) else {
                continue;
            };

            network
                .params_mut()
                .iter_mut()
                .zip(grad.iter())
                .zip(m.iter_mut())
                .zip(v.iter_mut())
                .for_each(|(((p, g), m), v)| {
                    *m = b1 * *m + (1. - b1) * g;
                    *v = b2 * *v + (1. - b2) * g.powi(2);
                    *p -= step_size * *m / (v.sqrt() + eps);
                });
        }

        Ok(updates.len())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array4;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        arch::{Sequential, layers::Layer},
        autodiff::GradientTape,
    };

    fn network(name: &str) -> Network {
        let arch = Sequential::new([Layer::conv2d(1, 1, 1, 1, 0)]);
        Network::new(name, arch, vec![1., 0.], StdRng::seed_from_u64(0)).unwrap()
    }

    fn grads_of(network: &mut Network) -> Gradients {
        let mut tape = GradientTape::new();
        let x = tape.constant(Array4::ones((1, 1, 1, 1)));
        let y = tape.apply(network, x).unwrap();
        tape.gradient(vec![(y, Array4::ones((1, 1, 1, 1)))], [&*network])
            .unwrap()
    }

    #[test]
    fn first_step_moves_every_param_by_the_learning_rate() {
        let mut g = network("g");
        let mut adam = Adam::new(0.1, 0.5, 0.999, 1e-8);
        adam.register(&g).unwrap();

        let grads = grads_of(&mut g);
        assert_eq!(adam.apply(&grads, [&mut g]).unwrap(), 1);

        assert!((g.params()[0] - 0.9).abs() < 1e-5);
        assert!((g.params()[1] + 0.1).abs() < 1e-5);
        let (b1, b2) = adam.beta_powers();
        assert!((b1 - 0.5).abs() < 1e-7);
        assert!((b2 - 0.999).abs() < 1e-7);
    }

    #[test]
    fn frozen_networks_are_skipped() {
        let mut g = network("g");
        let mut adam = Adam::new(0.1, 0.5, 0.999, 1e-8);
        adam.register(&g).unwrap();

        let grads = grads_of(&mut g);
        g.set_trainable(false);

        assert_eq!(adam.apply(&grads, [&mut g]).unwrap(), 0);
        assert_eq!(g.params(), &[1., 0.]);
        assert_eq!(adam.beta_powers(), (1., 1.));
    }

    #[test]
    fn unregistered_networks_are_an_error() {
        let mut g = network("g");
        let mut adam = Adam::new(0.1, 0.5, 0.999, 1e-8);

        let grads = grads_of(&mut g);
        assert_eq!(
            adam.apply(&grads, [&mut g]).unwrap_err(),
            MlErr::UnknownNetwork("g".to_owned())
        );
    }

    #[test]
    fn networks_register_once() {
        let g = network("g");
        let mut adam = Adam::new(0.1, 0.5, 0.999, 1e-8);
        adam.register(&g).unwrap();
        assert!(adam.register(&g).is_err());
    }
}
