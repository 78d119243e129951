use std::collections::BTreeMap;

/// Parameter gradients computed by a `GradientTape`, keyed by network name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gradients {
    grads: BTreeMap<String, Vec<f32>>,
}

impl Gradients {
    /// Returns the gradient buffer of a network, allocating a zeroed one of `size` if needed.
    pub(crate) fn buffer(&mut self, name: &str, size: usize) -> &mut [f32] {
        self.grads
            .entry(name.to_owned())
            .or_insert_with(|| vec![0.; size])
    }

    /// The gradient of the network called `name`, if any of its parameters received one.
    pub fn get(&self, name: &str) -> Option<&[f32]> {
        self.grads.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.grads.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.grads
            .iter()
            .map(|(name, grad)| (name.as_str(), grad.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    /// The L2 norm of all gradients together.
    pub fn global_norm(&self) -> f32 {
        self.grads
            .values()
            .flatten()
            .map(|g| g * g)
            .sum::<f32>()
            .sqrt()
    }
}
