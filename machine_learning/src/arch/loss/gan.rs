use ndarray::{Array4, ArrayView4};

use super::{LossFn, Mae, Mse, SigmoidCrossEntropy};

/// The adversarial objective used to score discriminator outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GanLoss {
    /// Mean squared error against the target labels.
    LeastSquares,
    /// Binary cross entropy on logits against the target labels.
    CrossEntropy,
}

impl GanLoss {
    fn eval(&self, logits: ArrayView4<f32>, target: f32) -> (f32, Array4<f32>) {
        let y = Array4::from_elem(logits.raw_dim(), target);

        match self {
            GanLoss::LeastSquares => (Mse.loss(logits, y.view()), Mse.loss_prime(logits, y.view())),
            GanLoss::CrossEntropy => (
                SigmoidCrossEntropy.loss(logits, y.view()),
                SigmoidCrossEntropy.loss_prime(logits, y.view()),
            ),
        }
    }
}

/// A scalar loss with its gradient with respect to the scored tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Loss {
    pub value: f32,
    pub grad: Array4<f32>,
}

/// The discriminator loss with one gradient for each of its inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscriminatorLoss {
    pub value: f32,
    pub real_grad: Array4<f32>,
    pub fake_grad: Array4<f32>,
}

/// Half the sum of the loss of real scores against 1 and fake scores against 0, so the
/// discriminator learns at half the rate of the generators.
pub fn discriminator_loss(
    kind: GanLoss,
    real: ArrayView4<f32>,
    fake: ArrayView4<f32>,
) -> DiscriminatorLoss {
    let (real_loss, real_grad) = kind.eval(real, 1.);
    let (fake_loss, fake_grad) = kind.eval(fake, 0.);

    DiscriminatorLoss {
        value: 0.5 * (real_loss + fake_loss),
        real_grad: real_grad * 0.5,
        fake_grad: fake_grad * 0.5,
    }
}

/// The loss of the discriminator scores of generated images against the real label.
pub fn generator_loss(kind: GanLoss, fake: ArrayView4<f32>) -> Loss {
    let (value, grad) = kind.eval(fake, 1.);
    Loss { value, grad }
}

/// L1 distance between real images and their reconstructions, weighted by `cyc_lambda`.
pub fn cycle_loss(real: ArrayView4<f32>, reconstructed: ArrayView4<f32>, cyc_lambda: f32) -> Loss {
    Loss {
        value: Mae.loss(reconstructed, real) * cyc_lambda,
        grad: Mae.loss_prime(reconstructed, real) * cyc_lambda,
    }
}

/// L1 distance between real images and their identity mapping, weighted by
/// `cyc_lambda * identity_lambda`. Disabled when `identity_lambda` is zero.
pub fn identity_loss(
    real: ArrayView4<f32>,
    identity: ArrayView4<f32>,
    cyc_lambda: f32,
    identity_lambda: f32,
) -> Option<Loss> {
    if identity_lambda == 0. {
        return None;
    }

    let weight = cyc_lambda * identity_lambda;
    Some(Loss {
        value: Mae.loss(identity, real) * weight,
        grad: Mae.loss_prime(identity, real) * weight,
    })
}

#[cfg(test)]
mod tests {
    use ndarray::Axis;

    use super::*;

    fn filled(v: f32) -> Array4<f32> {
        Array4::from_elem((2, 4, 4, 1), v)
    }

    #[test]
    fn lsgan_discriminator_loss_of_full_confusion_is_one() {
        // real scored 0 and fake scored 1: 0.5 * (1 + 1)
        let loss = discriminator_loss(GanLoss::LeastSquares, filled(0.).view(), filled(1.).view());
        assert!((loss.value - 1.).abs() < 1e-6);
    }

    #[test]
    fn perfect_discriminator_has_zero_lsgan_loss() {
        let loss = discriminator_loss(GanLoss::LeastSquares, filled(1.).view(), filled(0.).view());
        assert_eq!(loss.value, 0.);
        assert!(loss.real_grad.iter().all(|&g| g == 0.));
    }

    #[test]
    fn vanilla_generator_loss_at_zero_logits_is_ln_two() {
        let loss = generator_loss(GanLoss::CrossEntropy, filled(0.).view());
        assert!((loss.value - std::f32::consts::LN_2).abs() < 1e-6);
        assert!(loss.grad.iter().all(|&g| g < 0.));
    }

    #[test]
    fn cross_entropy_stays_finite_for_large_logits() {
        let loss = discriminator_loss(GanLoss::CrossEntropy, filled(-100.).view(), filled(100.).view());
        assert!(loss.value.is_finite());
        assert!((loss.value - 100.).abs() < 1e-3);
    }

    #[test]
    fn cycle_loss_is_weighted_l1() {
        let loss = cycle_loss(filled(0.5).view(), filled(0.).view(), 10.);
        assert!((loss.value - 5.).abs() < 1e-6);
    }

    fn gradient_image() -> Array4<f32> {
        Array4::from_shape_fn((2, 4, 4, 3), |(n, y, x, c)| {
            (n as f32 * 0.3 + y as f32 * 0.2 - x as f32 * 0.1 + c as f32 * 0.05).tanh()
        })
    }

    #[test]
    fn cycle_loss_vanishes_for_perfect_reconstructions() {
        let real = gradient_image();
        let loss = cycle_loss(real.view(), real.view(), 10.);

        assert_eq!(loss.value, 0.);
        assert!(loss.grad.iter().all(|&g| g == 0.));
    }

    #[test]
    fn cycle_loss_is_positive_for_any_difference() {
        let real = gradient_image();
        let mut reconstructed = real.clone();
        reconstructed[[1, 2, 3, 0]] += 1e-3;

        let loss = cycle_loss(real.view(), reconstructed.view(), 10.);
        assert!(loss.value > 0.);
        assert!(loss.grad[[1, 2, 3, 0]] > 0.);
    }

    #[test]
    fn cycle_loss_ignores_duplicated_batches() {
        let real = gradient_image();
        let reconstructed = real.mapv(|v| v * 0.5);
        let once = cycle_loss(real.view(), reconstructed.view(), 10.);

        let real2 = ndarray::concatenate(Axis(0), &[real.view(), real.view()]).unwrap();
        let reconstructed2 =
            ndarray::concatenate(Axis(0), &[reconstructed.view(), reconstructed.view()]).unwrap();
        let twice = cycle_loss(real2.view(), reconstructed2.view(), 10.);

        assert!((once.value - twice.value).abs() < 1e-4);
    }

    #[test]
    fn identity_loss_is_scaled_and_can_be_disabled() {
        let loss = identity_loss(filled(1.).view(), filled(0.).view(), 10., 0.5).unwrap();
        assert!((loss.value - 5.).abs() < 1e-6);
        assert!(identity_loss(filled(1.).view(), filled(0.).view(), 10., 0.).is_none());
    }

    #[test]
    fn gradients_match_finite_differences() {
        let x = Array4::from_shape_fn((1, 2, 2, 1), |(_, y, x, _)| y as f32 * 0.7 - x as f32 * 0.4);

        for kind in [GanLoss::LeastSquares, GanLoss::CrossEntropy] {
            let loss = generator_loss(kind, x.view());
            let h = 1e-2;
            let mut plus = x.clone();
            let mut minus = x.clone();
            plus[[0, 1, 0, 0]] += h;
            minus[[0, 1, 0, 0]] -= h;
            let numeric = (generator_loss(kind, plus.view()).value
                - generator_loss(kind, minus.view()).value)
                / (2. * h);
            assert!((numeric - loss.grad[[0, 1, 0, 0]]).abs() < 1e-3, "{kind:?}");
        }
    }
}
