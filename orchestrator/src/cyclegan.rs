use std::{ops::Range, path::PathBuf};

use log::{debug, info};
use machine_learning::{
    arch::{
        Mode, Network,
        loss::{GanLoss, cycle_loss, discriminator_loss, generator_loss, identity_loss},
    },
    autodiff::GradientTape,
    optimization::Adam,
};
use ndarray::Array4;
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    buffer::ImageHistoryBuffer,
    checkpoint::{CheckpointManager, Snapshot, SnapshotMode},
    configs::{Adapter, ModelConfig, TrainingConfig},
    error::{OrchestratorError, Result},
    metrics::{DiscriminatorLosses, GeneratorLosses, StepLosses},
    schedule::LinearDecay,
};

pub const GEN_A2B: &str = "gen_a2b";
pub const GEN_B2A: &str = "gen_b2a";
pub const DISC_A: &str = "disc_a";
pub const DISC_B: &str = "disc_b";
pub const GEN_OPTIMIZER: &str = "gen_optimizer";
pub const DISC_OPTIMIZER: &str = "disc_optimizer";

const ADAM_BETA2: f32 = 0.999;
const ADAM_EPSILON: f32 = 1e-8;

/// Where the model is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Ready,
    Restoring,
    Forward,
    GeneratorStep,
    DiscriminatorStep,
    Saving,
    Terminated,
}

/// The images produced by a training forward pass.
#[derive(Debug, Clone)]
pub struct Translation {
    pub fake_b: Array4<f32>,
    pub reconstructed_a: Array4<f32>,
    pub fake_a: Array4<f32>,
    pub reconstructed_b: Array4<f32>,
}

/// The images produced by an inference forward pass, next to their inputs.
#[derive(Debug, Clone)]
pub struct TestOutput {
    pub real_a: Array4<f32>,
    pub fake_a: Array4<f32>,
    pub real_b: Array4<f32>,
    pub fake_b: Array4<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored { path: PathBuf, global_step: u64 },
    NotFound,
}

/// Everything only a training run owns.
#[derive(Debug)]
struct Training {
    disc_a: Network,
    disc_b: Network,
    gen_optimizer: Adam,
    disc_optimizer: Adam,
    buffer_a: ImageHistoryBuffer,
    buffer_b: ImageHistoryBuffer,
    global_step: u64,
    gan_loss: GanLoss,
    cyc_lambda: f32,
    identity_lambda: f32,
    schedule: LinearDecay,
}

/// Two generators translating between domains A and B and, when training, the two
/// discriminators judging them together with their optimizers and history buffers.
#[derive(Debug)]
pub struct CycleGan {
    gen_a2b: Network,
    gen_b2a: Network,
    training: Option<Training>,
    phase: Phase,
}

impl CycleGan {
    /// Builds a freshly initialized model for training.
    ///
    /// # Returns
    /// An error if the options are invalid, detected before any network is allocated.
    pub fn for_training(model: &ModelConfig, config: &TrainingConfig) -> Result<Self> {
        let adapter = Adapter::new();
        adapter.validate_training(model, config)?;

        let gan_loss = adapter.gan_loss(config.gan_mode)?;
        let capacity = adapter.buffer_capacity(config.buffer_size)?;

        let mut rng = seeded_rng(config.seed);
        let gen_a2b = Network::initialize(GEN_A2B, adapter.generator(model), model.init_scale, &mut rng)?;
        let gen_b2a = Network::initialize(GEN_B2A, adapter.generator(model), model.init_scale, &mut rng)?;
        let disc_a = Network::initialize(DISC_A, adapter.discriminator(model), model.init_scale, &mut rng)?;
        let disc_b = Network::initialize(DISC_B, adapter.discriminator(model), model.init_scale, &mut rng)?;

        let mut gen_optimizer = Adam::new(config.lr, config.beta1, ADAM_BETA2, ADAM_EPSILON);
        gen_optimizer.register(&gen_a2b)?;
        gen_optimizer.register(&gen_b2a)?;

        let mut disc_optimizer = Adam::new(config.lr, config.beta1, ADAM_BETA2, ADAM_EPSILON);
        disc_optimizer.register(&disc_a)?;
        disc_optimizer.register(&disc_b)?;

        info!(
            generator_params = gen_a2b.size(),
            discriminator_params = disc_a.size();
            "built cyclegan for training"
        );

        Ok(Self {
            gen_a2b,
            gen_b2a,
            training: Some(Training {
                disc_a,
                disc_b,
                gen_optimizer,
                disc_optimizer,
                buffer_a: ImageHistoryBuffer::with_rng(capacity, StdRng::from_rng(&mut rng)),
                buffer_b: ImageHistoryBuffer::with_rng(capacity, StdRng::from_rng(&mut rng)),
                global_step: 0,
                gan_loss,
                cyc_lambda: config.cyc_lambda,
                identity_lambda: config.identity_lambda,
                schedule: LinearDecay::new(config.lr, config.niter, config.niter_decay),
            }),
            phase: Phase::Ready,
        })
    }

    /// Builds the two generators only, for translating images.
    pub fn for_inference(model: &ModelConfig, seed: Option<u64>) -> Result<Self> {
        let adapter = Adapter::new();
        adapter.validate_model(model)?;

        let mut rng = seeded_rng(seed);
        let gen_a2b = Network::initialize(GEN_A2B, adapter.generator(model), model.init_scale, &mut rng)?;
        let gen_b2a = Network::initialize(GEN_B2A, adapter.generator(model), model.init_scale, &mut rng)?;

        info!(generator_params = gen_a2b.size(); "built cyclegan for inference");

        Ok(Self {
            gen_a2b,
            gen_b2a,
            training: None,
            phase: Phase::Ready,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_training(&self) -> bool {
        self.training.is_some()
    }

    /// The amount of optimizer applications so far, always 0 in inference.
    pub fn global_step(&self) -> u64 {
        self.training.as_ref().map_or(0, |t| t.global_step)
    }

    /// The live learning rate of the optimizers.
    pub fn learning_rate(&self) -> Option<f32> {
        self.training
            .as_ref()
            .map(|t| t.gen_optimizer.learning_rate())
    }

    pub fn gen_a2b(&self) -> &Network {
        &self.gen_a2b
    }

    pub fn gen_b2a(&self) -> &Network {
        &self.gen_b2a
    }

    pub fn disc_a(&self) -> Option<&Network> {
        self.training.as_ref().map(|t| &t.disc_a)
    }

    pub fn disc_b(&self) -> Option<&Network> {
        self.training.as_ref().map(|t| &t.disc_b)
    }

    /// The epoch the global step falls into.
    pub fn current_epoch(&self, batches_per_epoch: usize) -> usize {
        LinearDecay::epoch_of(self.global_step(), batches_per_epoch)
    }

    /// Recomputes the learning rate for the current epoch and hands it to both optimizers.
    ///
    /// # Returns
    /// The new learning rate.
    pub fn update_learning_rate(&mut self, batches_per_epoch: usize) -> Result<f32> {
        let t = self.training_mut("updating the learning rate")?;
        let epoch = LinearDecay::epoch_of(t.global_step, batches_per_epoch);
        let lr = t.schedule.rate(epoch);

        t.gen_optimizer.set_learning_rate(lr);
        t.disc_optimizer.set_learning_rate(lr);
        Ok(lr)
    }

    /// Translates both batches to the other domain and back, in training mode.
    pub fn forward(&mut self, a: &Array4<f32>, b: &Array4<f32>) -> Result<Translation> {
        self.enter(Phase::Forward)?;

        let fake_b = self.gen_a2b.forward(a.clone(), Mode::Training)?;
        let reconstructed_a = self.gen_b2a.forward(fake_b.clone(), Mode::Training)?;
        let fake_a = self.gen_b2a.forward(b.clone(), Mode::Training)?;
        let reconstructed_b = self.gen_a2b.forward(fake_a.clone(), Mode::Training)?;

        Ok(Translation {
            fake_b,
            reconstructed_a,
            fake_a,
            reconstructed_b,
        })
    }

    /// Runs one full training iteration: a generator step followed by a discriminator step.
    pub fn optimize_parameters(&mut self, a: &Array4<f32>, b: &Array4<f32>) -> Result<StepLosses> {
        let generator = self.generator_step(a, b)?;
        let discriminator = self.discriminator_step(a, b)?;
        self.phase = Phase::Ready;

        Ok(StepLosses {
            generator,
            discriminator,
        })
    }

    /// Updates both generators on their adversarial, cycle and identity losses, with the
    /// discriminators frozen.
    pub fn generator_step(&mut self, a: &Array4<f32>, b: &Array4<f32>) -> Result<GeneratorLosses> {
        self.enter(Phase::GeneratorStep)?;

        let Self {
            gen_a2b,
            gen_b2a,
            training,
            ..
        } = self;
        let t = training
            .as_mut()
            .ok_or(OrchestratorError::NotTraining("the generator step"))?;

        t.disc_a.set_trainable(false);
        t.disc_b.set_trainable(false);

        let mut tape = GradientTape::new();
        let real_a = tape.constant(a.clone());
        let real_b = tape.constant(b.clone());

        let fake_b = tape.apply(gen_a2b, real_a)?;
        let reconstructed_a = tape.apply(gen_b2a, fake_b)?;
        let fake_a = tape.apply(gen_b2a, real_b)?;
        let reconstructed_b = tape.apply(gen_a2b, fake_a)?;
        let score_b = tape.apply(&mut t.disc_b, fake_b)?;
        let score_a = tape.apply(&mut t.disc_a, fake_a)?;

        let identities = if t.identity_lambda > 0. {
            Some((tape.apply(gen_b2a, real_a)?, tape.apply(gen_a2b, real_b)?))
        } else {
            None
        };

        let adv_a2b = generator_loss(t.gan_loss, tape.value(score_b)?.view());
        let adv_b2a = generator_loss(t.gan_loss, tape.value(score_a)?.view());
        let cyc_a = cycle_loss(a.view(), tape.value(reconstructed_a)?.view(), t.cyc_lambda);
        let cyc_b = cycle_loss(b.view(), tape.value(reconstructed_b)?.view(), t.cyc_lambda);

        let mut losses = GeneratorLosses {
            gen_a2b: adv_a2b.value,
            gen_b2a: adv_b2a.value,
            cycle_a: cyc_a.value,
            cycle_b: cyc_b.value,
            ..GeneratorLosses::default()
        };

        let mut seeds = vec![
            (score_b, adv_a2b.grad),
            (score_a, adv_b2a.grad),
            (reconstructed_a, cyc_a.grad),
            (reconstructed_b, cyc_b.grad),
        ];

        if let Some((same_a, same_b)) = identities {
            let (cyc, id) = (t.cyc_lambda, t.identity_lambda);

            if let Some(loss) = identity_loss(a.view(), tape.value(same_a)?.view(), cyc, id) {
                losses.identity_a = loss.value;
                seeds.push((same_a, loss.grad));
            }

            if let Some(loss) = identity_loss(b.view(), tape.value(same_b)?.view(), cyc, id) {
                losses.identity_b = loss.value;
                seeds.push((same_b, loss.grad));
            }
        }

        let grads = tape.gradient(seeds, [&*gen_a2b, &*gen_b2a, &t.disc_a, &t.disc_b])?;
        t.gen_optimizer.apply(&grads, [gen_a2b, gen_b2a])?;
        t.global_step += 1;

        debug!(
            global_step = t.global_step,
            loss = losses.total(),
            grad_norm = grads.global_norm();
            "generator step"
        );

        Ok(losses)
    }

    /// Updates each discriminator on real images against history buffered fakes, which are
    /// constants for this step.
    pub fn discriminator_step(&mut self, a: &Array4<f32>, b: &Array4<f32>) -> Result<DiscriminatorLosses> {
        let t = self.training_mut("the discriminator step")?;
        t.disc_a.set_trainable(true);
        t.disc_b.set_trainable(true);

        // the generators were just updated, so the fakes are recomputed
        let translation = self.forward(a, b)?;
        self.enter(Phase::DiscriminatorStep)?;

        let t = self.training_mut("the discriminator step")?;
        let fake_a = t.buffer_a.query(translation.fake_a.view())?;
        let fake_b = t.buffer_b.query(translation.fake_b.view())?;

        let disc_a = update_discriminator(&mut t.disc_a, &mut t.disc_optimizer, t.gan_loss, a, fake_a)?;
        t.global_step += 1;
        let disc_b = update_discriminator(&mut t.disc_b, &mut t.disc_optimizer, t.gan_loss, b, fake_b)?;
        t.global_step += 1;

        debug!(global_step = t.global_step, disc_a = disc_a, disc_b = disc_b; "discriminator step");
        Ok(DiscriminatorLosses { disc_a, disc_b })
    }

    /// Translates both batches with the generators in inference mode, without recording.
    pub fn test(&mut self, a: Array4<f32>, b: Array4<f32>) -> Result<TestOutput> {
        self.enter(Phase::Forward)?;

        let fake_a = self.gen_b2a.forward(b.clone(), Mode::Inference)?;
        let fake_b = self.gen_a2b.forward(a.clone(), Mode::Inference)?;
        self.phase = Phase::Ready;

        Ok(TestOutput {
            real_a: a,
            fake_a,
            real_b: b,
            fake_b,
        })
    }

    /// Writes the full state through `manager`.
    ///
    /// # Returns
    /// The path of the written snapshot.
    pub fn save(&mut self, manager: &CheckpointManager) -> Result<PathBuf> {
        self.enter(Phase::Saving)?;
        let path = manager.save(&self.snapshot())?;
        self.phase = Phase::Ready;

        info!(global_step = self.global_step(); "saved checkpoint to {}", path.display());
        Ok(path)
    }

    /// Loads the latest snapshot of `manager`, if any.
    ///
    /// # Returns
    /// Whether a snapshot was restored, or a `CheckpointMismatch` error if it doesn't fit the
    /// model, in which case nothing was modified.
    pub fn restore(&mut self, manager: &CheckpointManager) -> Result<RestoreOutcome> {
        self.enter(Phase::Restoring)?;

        let Some((path, snapshot)) = manager.load_latest()? else {
            self.phase = Phase::Ready;
            return Ok(RestoreOutcome::NotFound);
        };

        self.import(&snapshot)?;
        self.phase = Phase::Ready;

        Ok(RestoreOutcome::Restored {
            path,
            global_step: self.global_step(),
        })
    }

    /// Captures the current state. In inference only the generators are included.
    pub fn snapshot(&self) -> Snapshot {
        let mode = match self.training {
            Some(_) => SnapshotMode::Training,
            None => SnapshotMode::Inference,
        };

        let mut snapshot = Snapshot::new(self.global_step(), mode);
        for slot in self.slots() {
            if let Some(values) = self.read(&slot) {
                snapshot.insert(slot.name, slot.shape, values);
            }
        }

        snapshot
    }

    /// Ends the lifecycle of the model, any further operation fails.
    pub fn shutdown(&mut self) {
        self.phase = Phase::Terminated;
    }

    fn enter(&mut self, phase: Phase) -> Result<()> {
        if self.phase == Phase::Terminated {
            return Err(OrchestratorError::Terminated);
        }

        self.phase = phase;
        Ok(())
    }

    fn training_mut(&mut self, op: &'static str) -> Result<&mut Training> {
        self.training
            .as_mut()
            .ok_or(OrchestratorError::NotTraining(op))
    }

    fn import(&mut self, snapshot: &Snapshot) -> Result<()> {
        let slots = self.slots();
        let expected: Vec<_> = slots
            .iter()
            .map(|slot| (slot.name.clone(), slot.shape.clone()))
            .collect();

        let owners: &[&str] = match self.training {
            Some(_) => &[GEN_A2B, GEN_B2A, DISC_A, DISC_B, GEN_OPTIMIZER, DISC_OPTIMIZER],
            None => &[GEN_A2B, GEN_B2A],
        };
        let prefixes: Vec<String> = owners.iter().map(|owner| format!("{owner}/")).collect();
        let prefixes: Vec<&str> = prefixes.iter().map(String::as_str).collect();

        snapshot.verify(&expected, &prefixes)?;

        for slot in &slots {
            let tensor = snapshot
                .get(&slot.name)
                .and_then(|tensor| self.write(slot, &tensor.values));

            if tensor.is_none() {
                return Err(OrchestratorError::CheckpointMismatch {
                    tensor: slot.name.clone(),
                    reason: "couldn't be restored".into(),
                });
            }
        }

        if let Some(t) = &mut self.training {
            t.global_step = snapshot.global_step();
        }

        Ok(())
    }

    /// Every tensor that makes up the state, in a stable order.
    fn slots(&self) -> Vec<Slot> {
        let mut slots = Vec::new();
        let ids: &[NetId] = match self.training {
            Some(_) => &[NetId::GenA2B, NetId::GenB2A, NetId::DiscA, NetId::DiscB],
            None => &[NetId::GenA2B, NetId::GenB2A],
        };

        for &id in ids {
            let Some(network) = self.network(id) else {
                continue;
            };

            slots.extend(network.tensors().iter().map(|tensor| Slot {
                name: format!("{}/{}", network.name(), tensor.name),
                shape: tensor.shape.clone(),
                range: tensor.range.clone(),
                target: Target::Params(id),
            }));
        }

        if self.training.is_none() {
            return slots;
        }

        for optimizer in [OptimizerId::Generators, OptimizerId::Discriminators] {
            for id in optimizer.members() {
                let Some(network) = self.network(id) else {
                    continue;
                };

                for tensor in network.tensors() {
                    for (moment, suffix) in [(Moment::First, "m"), (Moment::Second, "v")] {
                        slots.push(Slot {
                            name: format!(
                                "{}/{}/{}.{suffix}",
                                optimizer.name(),
                                network.name(),
                                tensor.name
                            ),
                            shape: tensor.shape.clone(),
                            range: tensor.range.clone(),
                            target: Target::Moment(optimizer, id, moment),
                        });
                    }
                }
            }

            slots.push(Slot {
                name: format!("{}/beta_powers", optimizer.name()),
                shape: vec![2],
                range: 0..2,
                target: Target::BetaPowers(optimizer),
            });
            slots.push(Slot {
                name: format!("{}/learning_rate", optimizer.name()),
                shape: vec![1],
                range: 0..1,
                target: Target::LearningRate(optimizer),
            });
        }

        slots
    }

    fn read(&self, slot: &Slot) -> Option<Vec<f32>> {
        let range = slot.range.clone();

        match slot.target {
            Target::Params(id) => Some(self.network(id)?.params().get(range)?.to_vec()),
            Target::Moment(optimizer, id, moment) => {
                let moments = self.optimizer(optimizer)?.moments(id.name())?;
                let values = match moment {
                    Moment::First => &moments.m,
                    Moment::Second => &moments.v,
                };
                Some(values.get(range)?.to_vec())
            }
            Target::BetaPowers(optimizer) => {
                let (beta1_t, beta2_t) = self.optimizer(optimizer)?.beta_powers();
                Some(vec![beta1_t, beta2_t])
            }
            Target::LearningRate(optimizer) => {
                Some(vec![self.optimizer(optimizer)?.learning_rate()])
            }
        }
    }

    fn write(&mut self, slot: &Slot, values: &[f32]) -> Option<()> {
        let range = slot.range.clone();
        if values.len() != range.len() {
            return None;
        }

        match slot.target {
            Target::Params(id) => {
                self.network_mut(id)?
                    .params_mut()
                    .get_mut(range)?
                    .copy_from_slice(values);
            }
            Target::Moment(optimizer, id, moment) => {
                let moments = self.optimizer_mut(optimizer)?.moments_mut(id.name())?;
                let dst = match moment {
                    Moment::First => &mut moments.m,
                    Moment::Second => &mut moments.v,
                };
                dst.get_mut(range)?.copy_from_slice(values);
            }
            Target::BetaPowers(optimizer) => {
                self.optimizer_mut(optimizer)?
                    .set_beta_powers((values[0], values[1]));
            }
            Target::LearningRate(optimizer) => {
                self.optimizer_mut(optimizer)?
                    .set_learning_rate(values[0]);
            }
        }

        Some(())
    }

    fn network(&self, id: NetId) -> Option<&Network> {
        match id {
            NetId::GenA2B => Some(&self.gen_a2b),
            NetId::GenB2A => Some(&self.gen_b2a),
            NetId::DiscA => self.training.as_ref().map(|t| &t.disc_a),
            NetId::DiscB => self.training.as_ref().map(|t| &t.disc_b),
        }
    }

    fn network_mut(&mut self, id: NetId) -> Option<&mut Network> {
        match id {
            NetId::GenA2B => Some(&mut self.gen_a2b),
            NetId::GenB2A => Some(&mut self.gen_b2a),
            NetId::DiscA => self.training.as_mut().map(|t| &mut t.disc_a),
            NetId::DiscB => self.training.as_mut().map(|t| &mut t.disc_b),
        }
    }

    fn optimizer(&self, id: OptimizerId) -> Option<&Adam> {
        let t = self.training.as_ref()?;
        Some(match id {
            OptimizerId::Generators => &t.gen_optimizer,
            OptimizerId::Discriminators => &t.disc_optimizer,
        })
    }

    fn optimizer_mut(&mut self, id: OptimizerId) -> Option<&mut Adam> {
        let t = self.training.as_mut()?;
        Some(match id {
            OptimizerId::Generators => &mut t.gen_optimizer,
            OptimizerId::Discriminators => &mut t.disc_optimizer,
        })
    }
}

/// One discriminator update on its own tape.
fn update_discriminator(
    disc: &mut Network,
    optimizer: &mut Adam,
    gan_loss: GanLoss,
    real: &Array4<f32>,
    fake: Array4<f32>,
) -> Result<f32> {
    let mut tape = GradientTape::new();
    let real = tape.constant(real.clone());
    let fake = tape.constant(fake);

    let score_real = tape.apply(disc, real)?;
    let score_fake = tape.apply(disc, fake)?;
    let loss = discriminator_loss(
        gan_loss,
        tape.value(score_real)?.view(),
        tape.value(score_fake)?.view(),
    );

    let grads = tape.gradient(
        vec![(score_real, loss.real_grad), (score_fake, loss.fake_grad)],
        [&*disc],
    )?;
    optimizer.apply(&grads, [disc])?;

    Ok(loss.value)
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetId {
    GenA2B,
    GenB2A,
    DiscA,
    DiscB,
}

impl NetId {
    fn name(&self) -> &'static str {
        match self {
            NetId::GenA2B => GEN_A2B,
            NetId::GenB2A => GEN_B2A,
            NetId::DiscA => DISC_A,
            NetId::DiscB => DISC_B,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptimizerId {
    Generators,
    Discriminators,
}

impl OptimizerId {
    fn name(&self) -> &'static str {
        match self {
            OptimizerId::Generators => GEN_OPTIMIZER,
            OptimizerId::Discriminators => DISC_OPTIMIZER,
        }
    }

    fn members(&self) -> [NetId; 2] {
        match self {
            OptimizerId::Generators => [NetId::GenA2B, NetId::GenB2A],
            OptimizerId::Discriminators => [NetId::DiscA, NetId::DiscB],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Moment {
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Params(NetId),
    Moment(OptimizerId, NetId, Moment),
    BetaPowers(OptimizerId),
    LearningRate(OptimizerId),
}

/// A named tensor of the state and where it lives.
#[derive(Debug, Clone)]
struct Slot {
    name: String,
    shape: Vec<usize>,
    range: Range<usize>,
    target: Target,
}
