use std::{fmt, num::NonZeroUsize, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

/// The adversarial objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GanMode {
    Vanilla,
    #[default]
    Lsgan,
    /// Parsed for compatibility but rejected by validation.
    Wgangp,
}

impl FromStr for GanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vanilla" => Ok(Self::Vanilla),
            "lsgan" => Ok(Self::Lsgan),
            "wgangp" => Ok(Self::Wgangp),
            other => Err(format!(
                "unknown gan mode {other:?}, expected one of vanilla, lsgan, wgangp"
            )),
        }
    }
}

impl fmt::Display for GanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Vanilla => "vanilla",
            Self::Lsgan => "lsgan",
            Self::Wgangp => "wgangp",
        };

        write!(f, "{s}")
    }
}

/// Everything a training run needs besides the model shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub data_dir: PathBuf,
    pub save_dir: PathBuf,
    pub batch_size: NonZeroUsize,
    pub lr: f32,
    pub beta1: f32,
    /// Epochs at the initial learning rate.
    pub niter: usize,
    /// Epochs of linear decay to zero after `niter`.
    pub niter_decay: usize,
    pub epochs: usize,
    pub gan_mode: GanMode,
    /// History buffer capacity, in images.
    pub buffer_size: usize,
    pub cyc_lambda: f32,
    pub identity_lambda: f32,
    pub load_checkpoint: bool,
    pub save_epoch_freq: usize,
    /// Log the losses every this many iterations.
    pub summary_freq: usize,
    /// Snapshots kept on disk, 0 keeps all of them.
    pub max_to_keep: usize,
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("datasets/horse2zebra"),
            save_dir: PathBuf::from("checkpoints/horse2zebra"),
            batch_size: NonZeroUsize::MIN,
            lr: 0.0002,
            beta1: 0.5,
            niter: 100,
            niter_decay: 100,
            epochs: 200,
            gan_mode: GanMode::Lsgan,
            buffer_size: 50,
            cyc_lambda: 10.,
            identity_lambda: 0.5,
            load_checkpoint: true,
            save_epoch_freq: 5,
            summary_freq: 100,
            max_to_keep: 5,
            seed: None,
        }
    }
}

/// Everything a test run needs besides the model shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    pub data_dir: PathBuf,
    pub save_dir: PathBuf,
    pub results_dir: PathBuf,
    pub batch_size: NonZeroUsize,
    /// Amount of images per domain to translate.
    pub num_test: usize,
    pub seed: Option<u64>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("datasets/horse2zebra"),
            save_dir: PathBuf::from("checkpoints/horse2zebra"),
            results_dir: PathBuf::from("results/horse2zebra"),
            batch_size: NonZeroUsize::MIN,
            num_test: 50,
            seed: None,
        }
    }
}
