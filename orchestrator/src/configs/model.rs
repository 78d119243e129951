use serde::{Deserialize, Serialize};

/// The shape of the generators and discriminators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Side of the square input images, a positive multiple of 8.
    pub img_size: usize,
    /// Filters in the first generator convolution.
    pub ngf: usize,
    /// Filters in the first discriminator convolution.
    pub ndf: usize,
    pub n_res_blocks: usize,
    pub instance_norm: bool,
    /// Standard deviation of the normal weight initialization.
    pub init_scale: f32,
    pub use_dropout: bool,
    pub dropout_prob: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            img_size: 256,
            ngf: 64,
            ndf: 64,
            n_res_blocks: 9,
            instance_norm: true,
            init_scale: 0.02,
            use_dropout: false,
            dropout_prob: 0.5,
        }
    }
}
