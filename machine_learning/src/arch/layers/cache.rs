use ndarray::{Array2, Array4};

/// What a layer keeps from a recorded forward pass to compute its backward pass.
#[derive(Debug, Clone)]
pub enum LayerCache {
    Conv2d {
        cols: Array2<f32>,
        input_dim: (usize, usize, usize, usize),
    },
    InstanceNorm {
        xhat: Array4<f32>,
        inv_std: Array2<f32>,
    },
    Activation {
        z: Array4<f32>,
    },
    Dropout {
        mask: Option<Array4<f32>>,
    },
    Upsample,
    Residual {
        caches: Vec<LayerCache>,
    },
}
