use std::{num::NonZeroUsize, path::PathBuf, process::ExitCode, thread};

use clap::{ArgAction, Args, Parser, Subcommand};
use log::{error, info, warn};
use tokio::{runtime, signal};

use orchestrator::{
    StopHandle,
    configs::{GanMode, ModelConfig, TestConfig, TrainingConfig},
    data::ImageFolderSource,
};

/// Unpaired image to image translation with CycleGAN.
#[derive(Parser, Debug)]
#[command(name = "cyclegan", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train both generators and discriminators on `data_dir/trainA` and `data_dir/trainB`
    Train(TrainArgs),
    /// Translate the images of `data_dir/testA` and `data_dir/testB` with the latest checkpoint
    Test(TestArgs),
}

#[derive(Args, Debug)]
struct ModelArgs {
    #[arg(long, default_value_t = 256)]
    img_size: usize,
    #[arg(long, default_value_t = 64)]
    ngf: usize,
    #[arg(long, default_value_t = 64)]
    ndf: usize,
    #[arg(long, default_value_t = 9)]
    n_res_blocks: usize,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    instance_norm: bool,
    #[arg(long, default_value_t = 0.02)]
    init_scale: f32,
    #[arg(long)]
    use_dropout: bool,
    #[arg(long, default_value_t = 0.5)]
    dropout_prob: f32,
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[command(flatten)]
    model: ModelArgs,
    #[arg(long, default_value = "datasets/horse2zebra")]
    data_dir: PathBuf,
    #[arg(long, default_value = "checkpoints/horse2zebra")]
    save_dir: PathBuf,
    #[arg(long, default_value_t = NonZeroUsize::MIN)]
    batch_size: NonZeroUsize,
    #[arg(long, default_value_t = 0.0002)]
    lr: f32,
    #[arg(long, default_value_t = 0.5)]
    beta1: f32,
    /// Epochs at the initial learning rate
    #[arg(long, default_value_t = 100)]
    niter: usize,
    /// Epochs of linear decay to zero after `niter`
    #[arg(long, default_value_t = 100)]
    niter_decay: usize,
    #[arg(long, default_value_t = 200)]
    epochs: usize,
    /// One of vanilla, lsgan or wgangp
    #[arg(long, default_value_t = GanMode::Lsgan)]
    gan_mode: GanMode,
    /// Capacity of each image history buffer
    #[arg(long, default_value_t = 50)]
    buffer_size: usize,
    #[arg(long, default_value_t = 10.)]
    cyc_lambda: f32,
    #[arg(long, default_value_t = 0.5)]
    identity_lambda: f32,
    /// Resume from the latest checkpoint in `save_dir`, if any
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    load_checkpoint: bool,
    #[arg(long, default_value_t = 5)]
    save_epoch_freq: usize,
    #[arg(long, default_value_t = 100)]
    summary_freq: usize,
    #[arg(long, default_value_t = 5)]
    max_to_keep: usize,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct TestArgs {
    #[command(flatten)]
    model: ModelArgs,
    #[arg(long, default_value = "datasets/horse2zebra")]
    data_dir: PathBuf,
    #[arg(long, default_value = "checkpoints/horse2zebra")]
    save_dir: PathBuf,
    #[arg(long, default_value = "results/horse2zebra")]
    results_dir: PathBuf,
    #[arg(long, default_value_t = NonZeroUsize::MIN)]
    batch_size: NonZeroUsize,
    #[arg(long, default_value_t = 50)]
    num_test: usize,
    #[arg(long)]
    seed: Option<u64>,
}

impl From<ModelArgs> for ModelConfig {
    fn from(args: ModelArgs) -> Self {
        Self {
            img_size: args.img_size,
            ngf: args.ngf,
            ndf: args.ndf,
            n_res_blocks: args.n_res_blocks,
            instance_norm: args.instance_norm,
            init_scale: args.init_scale,
            use_dropout: args.use_dropout,
            dropout_prob: args.dropout_prob,
        }
    }
}

impl TrainArgs {
    fn into_configs(self) -> (ModelConfig, TrainingConfig) {
        let training = TrainingConfig {
            data_dir: self.data_dir,
            save_dir: self.save_dir,
            batch_size: self.batch_size,
            lr: self.lr,
            beta1: self.beta1,
            niter: self.niter,
            niter_decay: self.niter_decay,
            epochs: self.epochs,
            gan_mode: self.gan_mode,
            buffer_size: self.buffer_size,
            cyc_lambda: self.cyc_lambda,
            identity_lambda: self.identity_lambda,
            load_checkpoint: self.load_checkpoint,
            save_epoch_freq: self.save_epoch_freq,
            summary_freq: self.summary_freq,
            max_to_keep: self.max_to_keep,
            seed: self.seed,
        };

        (self.model.into(), training)
    }
}

impl TestArgs {
    fn into_configs(self) -> (ModelConfig, TestConfig) {
        let test = TestConfig {
            data_dir: self.data_dir,
            save_dir: self.save_dir,
            results_dir: self.results_dir,
            batch_size: self.batch_size,
            num_test: self.num_test,
            seed: self.seed,
        };

        (self.model.into(), test)
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let result = match Cli::parse().command {
        Command::Train(args) => run_train(args),
        Command::Test(args) => run_test(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run_train(args: TrainArgs) -> orchestrator::Result<()> {
    let (model, config) = args.into_configs();
    let mut source = ImageFolderSource::train(&config.data_dir, model.img_size, config.batch_size, config.seed)?;

    let stop = StopHandle::new();
    watch_ctrl_c(stop.clone());

    let report = orchestrator::train(&model, &config, &mut source, &stop)?;
    info!(
        global_step = report.global_step,
        iterations = report.iterations,
        stopped = report.stopped;
        "done"
    );

    Ok(())
}

fn run_test(args: TestArgs) -> orchestrator::Result<()> {
    let (model, config) = args.into_configs();
    let mut source = ImageFolderSource::test(&config.data_dir, model.img_size, config.batch_size)?;
    let report = orchestrator::test(&model, &config, &mut source)?;
    info!(images = report.images, restored = report.restored; "done");

    Ok(())
}

/// Requests a stop on the first Ctrl-C. Training finishes its current iteration and saves.
fn watch_ctrl_c(stop: StopHandle) {
    let spawned = thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            let rt = match runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    warn!("couldn't start the signal runtime: {e}");
                    return;
                }
            };

            rt.block_on(async {
                match signal::ctrl_c().await {
                    Ok(()) => {
                        info!("received ctrl-c, stopping after the current iteration");
                        stop.stop();
                    }
                    Err(e) => warn!("couldn't listen for ctrl-c: {e}"),
                }
            });
        });

    if let Err(e) = spawned {
        warn!("couldn't watch for ctrl-c: {e}");
    }
}
