mod act_fn;
mod leaky_relu;
mod relu;
mod tanh;

pub use act_fn::ActFn;
pub use leaky_relu::LeakyRelu;
pub use relu::Relu;
pub use tanh::Tanh;
