use ndarray::{Array4, ArrayView4};

pub trait LossFn {
    /// The mean loss of the predictions against the targets.
    fn loss(&self, y_pred: ArrayView4<f32>, y: ArrayView4<f32>) -> f32;

    /// The gradient of `loss` with respect to `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView4<f32>, y: ArrayView4<f32>) -> Array4<f32>;
}
