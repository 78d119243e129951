mod bias;
mod normal;
mod plan;
mod tensor_init;

pub use bias::BiasInit;
pub use normal::NormalInit;
pub use plan::InitPlan;
pub use tensor_init::TensorInit;

use rand::Rng;

use crate::{
    Result,
    arch::{ParamKind, Sequential},
};

/// Plans the initialization of every tensor of `arch`: weights are drawn from
/// `Normal(0, std_dev)` and biases start at zero.
///
/// # Returns
/// An error if `std_dev` is not a valid standard deviation.
pub fn normal_weights<R: Rng>(arch: &Sequential, std_dev: f32) -> Result<InitPlan<R>> {
    let mut inits: Vec<Box<dyn TensorInit<R>>> = Vec::new();

    for tensor in arch.tensors() {
        match tensor.kind {
            ParamKind::Weight => inits.push(Box::new(NormalInit::new(tensor, std_dev)?)),
            ParamKind::Bias => inits.extend(
                BiasInit::zeros(tensor).map(|init| Box::new(init) as Box<dyn TensorInit<R>>),
            ),
        }
    }

    InitPlan::new(inits, arch.size())
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{MlErr, arch::layers::Layer};

    #[test]
    fn weights_are_normal_and_biases_zero() {
        let arch = Sequential::new([Layer::conv2d(8, 16, 3, 1, 1)]);
        let mut rng = StdRng::seed_from_u64(7);
        let params = normal_weights(&arch, 0.02).unwrap().sample(&mut rng);
        assert_eq!(params.len(), arch.size());

        let (weights, biases) = params.split_at(arch.size() - 16);
        assert!(biases.iter().all(|&b| b == 0.));

        let mean = weights.iter().sum::<f32>() / weights.len() as f32;
        let var = weights.iter().map(|w| (w - mean).powi(2)).sum::<f32>() / weights.len() as f32;
        assert!(mean.abs() < 0.005);
        assert!((var.sqrt() - 0.02).abs() < 0.004);
    }

    #[test]
    fn residual_tensors_are_planned_in_order() {
        let arch = Sequential::new([
            Layer::conv2d(1, 2, 3, 1, 1),
            Layer::residual(vec![Layer::conv2d(2, 2, 3, 1, 1)]),
        ]);
        let plan = normal_weights::<StdRng>(&arch, 0.5).unwrap();

        assert_eq!(plan.sample(&mut StdRng::seed_from_u64(1)).len(), arch.size());
    }

    #[test]
    fn rejects_invalid_std_dev() {
        let arch = Sequential::new([Layer::conv2d(1, 1, 1, 1, 0)]);
        assert!(matches!(
            normal_weights::<StdRng>(&arch, f32::NAN),
            Err(MlErr::Init(_))
        ));
    }
}
