mod gradients;
mod tape;

pub use gradients::Gradients;
pub use tape::{GradientTape, Var};
