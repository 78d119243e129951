use std::num::NonZeroUsize;

use machine_learning::arch::{Sequential, activations::ActFn, layers::Layer, loss::GanLoss};

use super::{GanMode, ModelConfig, TestConfig, TrainingConfig};
use crate::error::{OrchestratorError, Result};

/// Channels of every image, RGB.
pub const IMAGE_CHANNELS: usize = 3;

/// Spatial downsampling factor of the discriminator.
const PATCH_STRIDE: usize = 8;

const LEAKY_SLOPE: f32 = 0.2;

/// Turns validated configuration into architectures.
#[derive(Debug, Default, Clone, Copy)]
pub struct Adapter;

impl Adapter {
    pub fn new() -> Self {
        Self
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    pub fn validate_model(&self, model: &ModelConfig) -> Result<()> {
        if model.img_size == 0 || model.img_size % PATCH_STRIDE != 0 {
            return Err(invalid(format!(
                "img_size ({}) must be a positive multiple of {PATCH_STRIDE}",
                model.img_size
            )));
        }

        if model.ngf == 0 || model.ndf == 0 {
            return Err(invalid("ngf and ndf must be positive"));
        }

        if !(model.init_scale.is_finite() && model.init_scale > 0.) {
            return Err(invalid(format!(
                "init_scale ({}) must be positive and finite",
                model.init_scale
            )));
        }

        if !(0. ..1.).contains(&model.dropout_prob) {
            return Err(invalid(format!(
                "dropout_prob ({}) must be in [0, 1)",
                model.dropout_prob
            )));
        }

        Ok(())
    }

    pub fn validate_training(&self, model: &ModelConfig, training: &TrainingConfig) -> Result<()> {
        self.validate_model(model)?;

        self.gan_loss(training.gan_mode)?;
        self.buffer_capacity(training.buffer_size)?;

        if training.epochs == 0 {
            return Err(invalid("epochs must be positive"));
        }

        // decay is requested when the run goes past the constant phase
        if training.epochs > training.niter && (training.niter == 0 || training.niter_decay == 0) {
            return Err(invalid(format!(
                "niter ({}) and niter_decay ({}) must be positive when training for {} epochs",
                training.niter, training.niter_decay, training.epochs
            )));
        }

        if !(training.lr.is_finite() && training.lr > 0.) {
            return Err(invalid(format!("lr ({}) must be positive", training.lr)));
        }

        if !(0. ..1.).contains(&training.beta1) {
            return Err(invalid(format!("beta1 ({}) must be in [0, 1)", training.beta1)));
        }

        for (name, weight) in [
            ("cyc_lambda", training.cyc_lambda),
            ("identity_lambda", training.identity_lambda),
        ] {
            if !(weight.is_finite() && weight >= 0.) {
                return Err(invalid(format!(
                    "{name} ({weight}) must be finite and non-negative"
                )));
            }
        }

        if training.save_epoch_freq == 0 || training.summary_freq == 0 {
            return Err(invalid("save_epoch_freq and summary_freq must be positive"));
        }

        Ok(())
    }

    /// The adversarial loss a `gan_mode` trains with.
    pub fn gan_loss(&self, mode: GanMode) -> Result<GanLoss> {
        match mode {
            GanMode::Lsgan => Ok(GanLoss::LeastSquares),
            GanMode::Vanilla => Ok(GanLoss::CrossEntropy),
            GanMode::Wgangp => Err(invalid(
                "gan_mode wgangp is not supported, use lsgan or vanilla",
            )),
        }
    }

    /// The history buffer capacity, in images.
    pub fn buffer_capacity(&self, buffer_size: usize) -> Result<NonZeroUsize> {
        NonZeroUsize::new(buffer_size).ok_or_else(|| invalid("buffer_size must be positive"))
    }

    pub fn validate_test(&self, model: &ModelConfig, test: &TestConfig) -> Result<()> {
        self.validate_model(model)?;

        if test.num_test == 0 {
            return Err(invalid("num_test must be positive"));
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Architectures
    // -------------------------------------------------------------------------

    /// A ResNet generator whose decoder upsamples and then convolves.
    pub fn generator(&self, model: &ModelConfig) -> Sequential {
        let ngf = model.ngf;
        let norm = model.instance_norm;
        let mut layers = Vec::new();

        conv_block(&mut layers, (IMAGE_CHANNELS, ngf), 7, 1, 3, norm, ActFn::relu());
        conv_block(&mut layers, (ngf, 2 * ngf), 3, 2, 1, norm, ActFn::relu());
        conv_block(&mut layers, (2 * ngf, 4 * ngf), 3, 2, 1, norm, ActFn::relu());

        for _ in 0..model.n_res_blocks {
            layers.push(residual_block(4 * ngf, model));
        }

        layers.push(Layer::upsample(2));
        conv_block(&mut layers, (4 * ngf, 2 * ngf), 3, 1, 1, norm, ActFn::relu());
        layers.push(Layer::upsample(2));
        conv_block(&mut layers, (2 * ngf, ngf), 3, 1, 1, norm, ActFn::relu());

        layers.push(Layer::conv2d(ngf, IMAGE_CHANNELS, 7, 1, 3));
        layers.push(Layer::activation(ActFn::tanh()));

        Sequential::new(layers)
    }

    /// A PatchGAN discriminator scoring `img_size / 8` squared patches.
    pub fn discriminator(&self, model: &ModelConfig) -> Sequential {
        let ndf = model.ndf;
        let norm = model.instance_norm;
        let leaky = ActFn::leaky_relu(LEAKY_SLOPE);
        let mut layers = Vec::new();

        conv_block(&mut layers, (IMAGE_CHANNELS, ndf), 4, 2, 1, false, leaky);
        conv_block(&mut layers, (ndf, 2 * ndf), 4, 2, 1, norm, leaky);
        conv_block(&mut layers, (2 * ndf, 4 * ndf), 4, 2, 1, norm, leaky);
        conv_block(&mut layers, (4 * ndf, 8 * ndf), 3, 1, 1, norm, leaky);
        layers.push(Layer::conv2d(8 * ndf, 1, 3, 1, 1));

        Sequential::new(layers)
    }

    /// The side of the score map the discriminator outputs.
    pub fn patch_grid(&self, model: &ModelConfig) -> usize {
        model.img_size / PATCH_STRIDE
    }
}

fn conv_block(
    layers: &mut Vec<Layer>,
    (in_channels, out_channels): (usize, usize),
    kernel: usize,
    stride: usize,
    padding: usize,
    norm: bool,
    act_fn: ActFn,
) {
    layers.push(Layer::conv2d(
        in_channels,
        out_channels,
        kernel,
        stride,
        padding,
    ));

    if norm {
        layers.push(Layer::instance_norm());
    }

    layers.push(Layer::activation(act_fn));
}

fn residual_block(channels: usize, model: &ModelConfig) -> Layer {
    let mut body = Vec::new();
    conv_block(
        &mut body,
        (channels, channels),
        3,
        1,
        1,
        model.instance_norm,
        ActFn::relu(),
    );

    if model.use_dropout {
        body.push(Layer::dropout(model.dropout_prob));
    }

    body.push(Layer::conv2d(channels, channels, 3, 1, 1));
    if model.instance_norm {
        body.push(Layer::instance_norm());
    }

    Layer::residual(body)
}

fn invalid(msg: impl Into<String>) -> OrchestratorError {
    OrchestratorError::InvalidConfig(msg.into())
}
