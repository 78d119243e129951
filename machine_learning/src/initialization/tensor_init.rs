use rand::Rng;

use crate::arch::TensorInfo;

/// Initial values for one named parameter tensor.
pub trait TensorInit<R: Rng> {
    /// The tensor this initializer writes.
    fn tensor(&self) -> &TensorInfo;

    /// Writes the initial values of the tensor into `out`, which holds exactly
    /// `self.tensor().len()` values.
    fn fill(&self, rng: &mut R, out: &mut [f32]);
}
