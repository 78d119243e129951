use std::collections::HashMap;

use log::trace;
use ndarray::Array4;

use super::Gradients;
use crate::{
    MlErr, Result,
    arch::{Network, layers::LayerCache},
};

/// A handle to a value recorded on a `GradientTape`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Var(usize);

#[derive(Debug)]
enum Node {
    Constant,
    Apply {
        network: String,
        input: usize,
        caches: Vec<LayerCache>,
    },
}

/// Records network applications so the gradient of a set of losses with respect to the
/// parameters of every network involved can be computed afterwards.
///
/// A tape is consumed when computing gradients, so every optimization step records its own
/// independent tape.
#[derive(Debug, Default)]
pub struct GradientTape {
    values: Vec<Array4<f32>>,
    nodes: Vec<Node>,
}

impl GradientTape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a value that no gradient needs to flow through, like a real image.
    pub fn constant(&mut self, x: Array4<f32>) -> Var {
        self.push(x, Node::Constant)
    }

    /// Applies `network` to the recorded `input` in training mode.
    ///
    /// # Returns
    /// The recorded output or an error if the forward pass failed.
    pub fn apply(&mut self, network: &mut Network, input: Var) -> Result<Var> {
        let x = self.value(input)?.clone();
        let (y, caches) = network.forward_recorded(x)?;

        Ok(self.push(
            y,
            Node::Apply {
                network: network.name().to_owned(),
                input: input.0,
                caches,
            },
        ))
    }

    /// The value recorded for `var`.
    pub fn value(&self, var: Var) -> Result<&Array4<f32>> {
        self.values.get(var.0).ok_or(MlErr::UnknownVar(var.0))
    }

    /// Backpropagates the given output gradients down the tape.
    ///
    /// # Arguments
    /// * `seeds` - The gradient of the total loss with respect to some recorded values.
    /// * `networks` - Every network applied on this tape. Frozen ones only propagate gradients.
    ///
    /// # Returns
    /// The parameter gradients of every trainable network the seeds reach.
    pub fn gradient<'n, I>(self, seeds: Vec<(Var, Array4<f32>)>, networks: I) -> Result<Gradients>
    where
        I: IntoIterator<Item = &'n Network>,
    {
        let networks: HashMap<_, _> = networks
            .into_iter()
            .map(|network| (network.name(), network))
            .collect();

        let mut adjoints: Vec<Option<Array4<f32>>> = vec![None; self.values.len()];
        for (var, d) in seeds {
            let value = self.value(var)?;
            if value.dim() != d.dim() {
                return Err(MlErr::ShapeMismatch {
                    what: "seed gradient",
                    got: d.shape().to_vec(),
                    expected: value.shape().to_vec(),
                });
            }

            accumulate(&mut adjoints[var.0], d);
        }

        drop(self.values);
        let mut grads = Gradients::default();

        for (i, node) in self.nodes.into_iter().enumerate().rev() {
            let Node::Apply {
                network,
                input,
                caches,
            } = node
            else {
                continue;
            };

            let Some(d) = adjoints[i].take() else {
                continue;
            };

            let network = networks
                .get(network.as_str())
                .ok_or(MlErr::UnknownNetwork(network))?;

            let grad = network
                .is_trainable()
                .then(|| grads.buffer(network.name(), network.size()));

            trace!(network = network.name(), trainable = network.is_trainable(); "backpropagating");
            let dx = network.backward(grad, caches, d)?;
            accumulate(&mut adjoints[input], dx);
        }

        Ok(grads)
    }

    fn push(&mut self, value: Array4<f32>, node: Node) -> Var {
        self.values.push(value);
        self.nodes.push(node);
        Var(self.nodes.len() - 1)
    }
}

fn accumulate(slot: &mut Option<Array4<f32>>, d: Array4<f32>) {
    match slot {
        Some(acc) => *acc += &d,
        None => *slot = Some(d),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array4;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::arch::{Mode, Sequential, activations::ActFn, layers::Layer};

    fn network(name: &str, seed: u64) -> Network {
        let arch = Sequential::new([
            Layer::conv2d(1, 2, 3, 1, 1),
            Layer::activation(ActFn::tanh()),
            Layer::conv2d(2, 1, 3, 1, 1),
        ]);
        Network::initialize(name, arch, 0.3, &mut StdRng::seed_from_u64(seed)).unwrap()
    }

    fn input() -> Array4<f32> {
        Array4::from_shape_fn((1, 4, 4, 1), |(_, y, x, _)| (y as f32 - x as f32) * 0.2)
    }

    #[test]
    fn frozen_networks_propagate_but_do_not_accumulate() {
        let mut g = network("g", 1);
        let mut d = network("d", 2);
        d.set_trainable(false);

        let mut tape = GradientTape::new();
        let x = tape.constant(input());
        let fake = tape.apply(&mut g, x).unwrap();
        let score = tape.apply(&mut d, fake).unwrap();
        let ones = Array4::ones(tape.value(score).unwrap().dim());

        let grads = tape.gradient(vec![(score, ones)], [&g, &d]).unwrap();

        assert!(grads.contains("g"));
        assert!(!grads.contains("d"));
        assert!(grads.global_norm() > 0.);
    }

    #[test]
    fn composed_gradient_matches_finite_differences() {
        let mut g = network("g", 3);
        let mut f = network("f", 4);

        let mut tape = GradientTape::new();
        let x = tape.constant(input());
        let y = tape.apply(&mut g, x).unwrap();
        let z = tape.apply(&mut f, y).unwrap();
        let seed = Array4::ones(tape.value(z).unwrap().dim());
        let grads = tape.gradient(vec![(z, seed)], [&g, &f]).unwrap();

        let objective = |g: &mut Network, f: &mut Network| {
            let y = g.forward(input(), Mode::Training).unwrap();
            f.forward(y, Mode::Training).unwrap().sum()
        };

        let h = 1e-2;
        let grad = grads.get("g").unwrap().to_vec();
        for i in [0, 4, 10, g.size() - 1] {
            g.params_mut()[i] += h;
            let plus = objective(&mut g, &mut f);
            g.params_mut()[i] -= 2. * h;
            let minus = objective(&mut g, &mut f);
            g.params_mut()[i] += h;

            let numeric = (plus - minus) / (2. * h);
            assert!((numeric - grad[i]).abs() < 2e-2, "param {i}: {numeric} vs {}", grad[i]);
        }
    }

    #[test]
    fn reused_networks_accumulate_gradients() {
        let mut g = network("g", 5);

        let mut tape = GradientTape::new();
        let x = tape.constant(input());
        let once = tape.apply(&mut g, x).unwrap();
        let twice = tape.apply(&mut g, once).unwrap();
        let seed = Array4::ones(tape.value(twice).unwrap().dim());
        let both = tape
            .gradient(vec![(twice, seed.clone()), (once, seed)], [&g])
            .unwrap();

        assert_eq!(both.len(), 1);
        assert_eq!(both.get("g").unwrap().len(), g.size());
    }

    #[test]
    fn missing_networks_are_an_error() {
        let mut g = network("g", 6);

        let mut tape = GradientTape::new();
        let x = tape.constant(input());
        let y = tape.apply(&mut g, x).unwrap();
        let seed = Array4::ones(tape.value(y).unwrap().dim());

        assert_eq!(
            tape.gradient(vec![(y, seed)], []).unwrap_err(),
            MlErr::UnknownNetwork("g".to_owned())
        );
    }
}
