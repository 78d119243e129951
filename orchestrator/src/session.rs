use std::{
    fs,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use log::{info, warn};
use ndarray::Axis;
use serde::Serialize;

use crate::{
    checkpoint::CheckpointManager,
    configs::{Adapter, ModelConfig, TestConfig, TrainingConfig},
    cyclegan::{CycleGan, RestoreOutcome},
    data::{DataSource, Domain, Fetch, save_image},
    error::Result,
    metrics::{EpochMetrics, StepLosses},
};

/// Name of the file the options of a training run are persisted to.
pub const OPTIONS_FILE: &str = "options.json";

/// Lets another thread ask a running session to stop after its current iteration.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What a finished training run did.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub global_step: u64,
    pub iterations: usize,
    pub epochs_run: usize,
    /// Whether the run resumed from a checkpoint.
    pub restored: bool,
    /// Whether the run ended early because a stop was requested.
    pub stopped: bool,
    pub last_checkpoint: Option<PathBuf>,
    pub last_losses: Option<StepLosses>,
}

/// What a finished test run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    /// The amount of translated image pairs.
    pub images: usize,
    pub restored: bool,
    pub results_dir: PathBuf,
}

#[derive(Serialize)]
struct Options<'a> {
    model: &'a ModelConfig,
    training: &'a TrainingConfig,
}

/// Trains a CycleGAN on the batches of `source` until `config.epochs` epochs are done or a stop
/// is requested through `stop`.
///
/// # Arguments
/// * `model` - The shape of the networks.
/// * `config` - The training options.
/// * `source` - Where the batches of both domains come from.
/// * `stop` - Checked before every iteration.
///
/// # Returns
/// A summary of the run, or the first error found. Running out of data only ends the epoch.
pub fn train<S: DataSource>(
    model: &ModelConfig,
    config: &TrainingConfig,
    source: &mut S,
    stop: &StopHandle,
) -> Result<TrainingReport> {
    Adapter::new().validate_training(model, config)?;
    log_options(model, config);

    fs::create_dir_all(&config.save_dir)?;
    let options = serde_json::to_string_pretty(&Options {
        model,
        training: config,
    })?;
    fs::write(config.save_dir.join(OPTIONS_FILE), options)?;

    let mut gan = CycleGan::for_training(model, config)?;
    let manager = CheckpointManager::new(&config.save_dir, config.max_to_keep);

    let mut saved_step = None;
    let restored = if config.load_checkpoint {
        match gan.restore(&manager)? {
            RestoreOutcome::Restored { path, global_step } => {
                info!(global_step = global_step; "restored checkpoint {}", path.display());
                saved_step = Some(global_step);
                true
            }
            RestoreOutcome::NotFound => {
                info!(
                    "no checkpoint found in {}, starting from freshly initialized networks",
                    manager.dir().display()
                );
                false
            }
        }
    } else {
        false
    };

    let batches_per_epoch = source.batches_per_epoch();
    let start_epoch = gan.current_epoch(batches_per_epoch);

    let mut report = TrainingReport {
        global_step: gan.global_step(),
        iterations: 0,
        epochs_run: 0,
        restored,
        stopped: false,
        last_checkpoint: None,
        last_losses: None,
    };

    info!(
        start_epoch = start_epoch,
        epochs = config.epochs,
        batches_per_epoch = batches_per_epoch;
        "starting training"
    );

    for epoch in start_epoch..config.epochs {
        let lr = gan.update_learning_rate(batches_per_epoch)?;
        info!(epoch = epoch, lr = lr; "starting epoch");

        let mut metrics = EpochMetrics::default();

        for iteration in 0..batches_per_epoch {
            if stop.is_stopped() {
                break;
            }

            let (Fetch::Batch(a), Fetch::Batch(b)) =
                (source.next_batch(Domain::A)?, source.next_batch(Domain::B)?)
            else {
                warn!(epoch = epoch, iteration = iteration; "data source exhausted, ending the epoch early");
                break;
            };

            let started = Instant::now();
            let losses = gan.optimize_parameters(&a, &b)?;
            metrics.record(&losses, started.elapsed());

            report.iterations += 1;
            if config.summary_freq > 0 && report.iterations % config.summary_freq == 0 {
                info!(epoch = epoch, global_step = gan.global_step(); "{losses}");
            }

            report.last_losses = Some(losses);
        }

        report.epochs_run += 1;

        if metrics.iterations > 0 {
            info!(
                epoch = epoch,
                iterations = metrics.iterations,
                secs = metrics.compute_time.as_secs_f64();
                "finished epoch, mean {}",
                metrics.mean()
            );
        }

        if stop.is_stopped() {
            info!(epoch = epoch; "stop requested, wrapping up");
            report.stopped = true;
            break;
        }

        if config.save_epoch_freq > 0 && (epoch + 1) % config.save_epoch_freq == 0 {
            report.last_checkpoint = Some(gan.save(&manager)?);
            saved_step = Some(gan.global_step());
        }
    }

    if saved_step != Some(gan.global_step()) {
        report.last_checkpoint = Some(gan.save(&manager)?);
    }

    report.global_step = gan.global_step();
    gan.shutdown();

    info!(
        global_step = report.global_step,
        iterations = report.iterations;
        "training finished"
    );

    Ok(report)
}

/// Translates up to `config.num_test` images per domain with the latest generators and writes
/// them next to their inputs as PNGs into `config.results_dir`.
///
/// # Returns
/// A summary of the run, or the first error found.
pub fn test<S: DataSource>(model: &ModelConfig, config: &TestConfig, source: &mut S) -> Result<TestReport> {
    Adapter::new().validate_test(model, config)?;

    let mut gan = CycleGan::for_inference(model, config.seed)?;
    let manager = CheckpointManager::new(&config.save_dir, 0);

    let restored = match gan.restore(&manager)? {
        RestoreOutcome::Restored { path, .. } => {
            info!("restored generators from {}", path.display());
            true
        }
        RestoreOutcome::NotFound => {
            warn!(
                "no checkpoint found in {}, translating with untrained generators",
                manager.dir().display()
            );
            false
        }
    };

    fs::create_dir_all(&config.results_dir)?;

    let mut images = 0;
    let mut batch = 0;

    while images < config.num_test {
        let (Fetch::Batch(a), Fetch::Batch(b)) =
            (source.next_batch(Domain::A)?, source.next_batch(Domain::B)?)
        else {
            break;
        };

        let output = gan.test(a, b)?;
        let outputs = [
            ("real_A", &output.real_a),
            ("fake_B", &output.fake_b),
            ("real_B", &output.real_b),
            ("fake_A", &output.fake_a),
        ];

        for j in 0..output.real_a.len_of(Axis(0)) {
            if images >= config.num_test {
                break;
            }

            for (name, tensor) in outputs {
                let path = config.results_dir.join(format!("{batch:04}_{j}_{name}.png"));
                save_image(&path, tensor.index_axis(Axis(0), j))?;
            }

            images += 1;
        }

        batch += 1;
    }

    gan.shutdown();
    info!(images = images; "wrote results to {}", config.results_dir.display());

    Ok(TestReport {
        images,
        restored,
        results_dir: config.results_dir.clone(),
    })
}

fn log_options(model: &ModelConfig, config: &TrainingConfig) {
    info!(
        img_size = model.img_size,
        ngf = model.ngf,
        ndf = model.ndf,
        n_res_blocks = model.n_res_blocks,
        instance_norm = model.instance_norm;
        "model options"
    );
    info!(
        batch_size = config.batch_size.get(),
        lr = config.lr,
        beta1 = config.beta1,
        niter = config.niter,
        niter_decay = config.niter_decay,
        epochs = config.epochs,
        buffer_size = config.buffer_size,
        cyc_lambda = config.cyc_lambda,
        identity_lambda = config.identity_lambda;
        "training options, gan_mode {}, data_dir {}, save_dir {}",
        config.gan_mode,
        config.data_dir.display(),
        config.save_dir.display()
    );
}
