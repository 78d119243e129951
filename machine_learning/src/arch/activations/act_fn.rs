use super::{LeakyRelu, Relu, Tanh};

/// Element-wise activation functions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActFn {
    Relu(Relu),
    LeakyRelu(LeakyRelu),
    Tanh(Tanh),
}

impl ActFn {
    pub fn relu() -> Self {
        ActFn::Relu(Relu)
    }

    pub fn leaky_relu(slope: f32) -> Self {
        ActFn::LeakyRelu(LeakyRelu::new(slope))
    }

    pub fn tanh() -> Self {
        ActFn::Tanh(Tanh)
    }

    pub fn f(&self, z: f32) -> f32 {
        match self {
            ActFn::Relu(a) => a.f(z),
            ActFn::LeakyRelu(a) => a.f(z),
            ActFn::Tanh(a) => a.f(z),
        }
    }

    /// The derivative evaluated at the pre-activation value `z`.
    pub fn df(&self, z: f32) -> f32 {
        match self {
            ActFn::Relu(a) => a.df(z),
            ActFn::LeakyRelu(a) => a.df(z),
            ActFn::Tanh(a) => a.df(z),
        }
    }
}
