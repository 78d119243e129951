use std::num::NonZeroUsize;

use ndarray::Array4;
use rand::{Rng, SeedableRng, rngs::StdRng};

use orchestrator::{
    CycleGan, OrchestratorError,
    checkpoint::CheckpointManager,
    configs::{GanMode, ModelConfig, TrainingConfig},
    cyclegan::{Phase, RestoreOutcome},
};

fn tiny_model() -> ModelConfig {
    ModelConfig {
        img_size: 16,
        ngf: 2,
        ndf: 2,
        n_res_blocks: 1,
        ..ModelConfig::default()
    }
}

fn tiny_training(seed: u64) -> TrainingConfig {
    TrainingConfig {
        batch_size: NonZeroUsize::MIN,
        niter: 1,
        niter_decay: 2,
        epochs: 3,
        buffer_size: 4,
        seed: Some(seed),
        ..TrainingConfig::default()
    }
}

fn batch(seed: u64) -> Array4<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array4::from_shape_fn((1, 16, 16, 3), |_| rng.random_range(-1.0..1.0))
}

#[test]
fn every_iteration_applies_three_updates() {
    let mut gan = CycleGan::for_training(&tiny_model(), &tiny_training(0)).unwrap();
    let (a, b) = (batch(1), batch(2));

    assert_eq!(gan.global_step(), 0);
    gan.optimize_parameters(&a, &b).unwrap();
    assert_eq!(gan.global_step(), 3);
    gan.optimize_parameters(&a, &b).unwrap();
    assert_eq!(gan.global_step(), 6);
    assert_eq!(gan.phase(), Phase::Ready);
}

#[test]
fn generator_step_leaves_discriminators_untouched() {
    let mut gan = CycleGan::for_training(&tiny_model(), &tiny_training(0)).unwrap();
    let (a, b) = (batch(1), batch(2));

    let disc_a = gan.disc_a().unwrap().params().to_vec();
    let disc_b = gan.disc_b().unwrap().params().to_vec();
    let gen_a2b = gan.gen_a2b().params().to_vec();

    let losses = gan.generator_step(&a, &b).unwrap();

    assert_eq!(gan.global_step(), 1);
    assert_eq!(gan.disc_a().unwrap().params(), disc_a.as_slice());
    assert_eq!(gan.disc_b().unwrap().params(), disc_b.as_slice());
    assert_ne!(gan.gen_a2b().params(), gen_a2b.as_slice());
    assert!(losses.total().is_finite());
    assert!(losses.cycle_a > 0.);
}

#[test]
fn discriminator_step_leaves_generators_untouched() {
    let mut gan = CycleGan::for_training(&tiny_model(), &tiny_training(0)).unwrap();
    let (a, b) = (batch(1), batch(2));

    let gen_a2b = gan.gen_a2b().params().to_vec();
    let gen_b2a = gan.gen_b2a().params().to_vec();
    let disc_a = gan.disc_a().unwrap().params().to_vec();

    let losses = gan.discriminator_step(&a, &b).unwrap();

    assert_eq!(gan.global_step(), 2);
    assert_eq!(gan.gen_a2b().params(), gen_a2b.as_slice());
    assert_eq!(gan.gen_b2a().params(), gen_b2a.as_slice());
    assert_ne!(gan.disc_a().unwrap().params(), disc_a.as_slice());
    assert!(losses.disc_a >= 0. && losses.disc_b >= 0.);
    assert!(gan.disc_a().unwrap().is_trainable());
}

#[test]
fn identity_loss_vanishes_without_its_weight() {
    let config = TrainingConfig {
        identity_lambda: 0.,
        ..tiny_training(0)
    };
    let mut gan = CycleGan::for_training(&tiny_model(), &config).unwrap();

    let losses = gan.generator_step(&batch(1), &batch(2)).unwrap();
    assert_eq!(losses.identity_a, 0.);
    assert_eq!(losses.identity_b, 0.);
}

#[test]
fn vanilla_objective_trains_too() {
    let config = TrainingConfig {
        gan_mode: GanMode::Vanilla,
        ..tiny_training(0)
    };
    let mut gan = CycleGan::for_training(&tiny_model(), &config).unwrap();

    let losses = gan.optimize_parameters(&batch(1), &batch(2)).unwrap();
    assert!(losses.discriminator.disc_a.is_finite());
    assert!(losses.generator.total().is_finite());
}

#[test]
fn invalid_options_are_rejected_up_front() {
    let wgangp = TrainingConfig {
        gan_mode: GanMode::Wgangp,
        ..tiny_training(0)
    };
    let no_buffer = TrainingConfig {
        buffer_size: 0,
        ..tiny_training(0)
    };

    for config in [wgangp, no_buffer] {
        let result = CycleGan::for_training(&tiny_model(), &config);
        assert!(matches!(result, Err(OrchestratorError::InvalidConfig(_))));
    }
}

#[test]
fn learning_rate_follows_the_epoch_of_the_global_step() {
    let config = tiny_training(0);
    let mut gan = CycleGan::for_training(&tiny_model(), &config).unwrap();
    let (a, b) = (batch(1), batch(2));

    // one batch per epoch, so every iteration is an epoch
    assert_eq!(gan.update_learning_rate(1).unwrap(), config.lr);

    gan.optimize_parameters(&a, &b).unwrap();
    assert_eq!(gan.update_learning_rate(1).unwrap(), config.lr);

    gan.optimize_parameters(&a, &b).unwrap();
    let lr = gan.update_learning_rate(1).unwrap();
    assert!((lr - config.lr / 2.).abs() < 1e-9);
    assert_eq!(gan.learning_rate(), Some(lr));

    gan.optimize_parameters(&a, &b).unwrap();
    assert_eq!(gan.update_learning_rate(1).unwrap(), 0.);
}

#[test]
fn test_forward_is_deterministic() {
    let model = ModelConfig {
        use_dropout: true,
        ..tiny_model()
    };
    let mut gan = CycleGan::for_inference(&model, Some(3)).unwrap();
    let (a, b) = (batch(1), batch(2));

    let first = gan.test(a.clone(), b.clone()).unwrap();
    let second = gan.test(a.clone(), b.clone()).unwrap();

    assert_eq!(first.real_a, a);
    assert_eq!(first.real_b, b);
    assert_eq!(first.fake_a.dim(), (1, 16, 16, 3));
    assert_eq!(first.fake_a, second.fake_a);
    assert_eq!(first.fake_b, second.fake_b);
}

#[test]
fn inference_models_refuse_to_train() {
    let mut gan = CycleGan::for_inference(&tiny_model(), Some(0)).unwrap();

    let result = gan.optimize_parameters(&batch(1), &batch(2));
    assert!(matches!(result, Err(OrchestratorError::NotTraining(_))));
    assert_eq!(gan.global_step(), 0);
    assert!(gan.disc_a().is_none());
}

#[test]
fn nothing_runs_after_shutdown() {
    let mut gan = CycleGan::for_training(&tiny_model(), &tiny_training(0)).unwrap();
    gan.shutdown();

    let result = gan.optimize_parameters(&batch(1), &batch(2));
    assert!(matches!(result, Err(OrchestratorError::Terminated)));
    assert_eq!(gan.phase(), Phase::Terminated);
}

#[test]
fn restoring_without_a_checkpoint_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let manager = CheckpointManager::new(dir.path(), 5);
    let mut gan = CycleGan::for_training(&tiny_model(), &tiny_training(0)).unwrap();

    assert_eq!(gan.restore(&manager).unwrap(), RestoreOutcome::NotFound);
}

#[test]
fn checkpoint_round_trip_restores_the_full_state() {
    let dir = tempfile::tempdir().unwrap();
    let manager = CheckpointManager::new(dir.path(), 5);
    let (a, b) = (batch(1), batch(2));

    let mut trained = CycleGan::for_training(&tiny_model(), &tiny_training(0)).unwrap();
    trained.update_learning_rate(1).unwrap();
    trained.optimize_parameters(&a, &b).unwrap();
    trained.optimize_parameters(&a, &b).unwrap();
    trained.update_learning_rate(1).unwrap();
    let path = trained.save(&manager).unwrap();

    let mut restored = CycleGan::for_training(&tiny_model(), &tiny_training(99)).unwrap();
    let outcome = restored.restore(&manager).unwrap();

    assert_eq!(
        outcome,
        RestoreOutcome::Restored {
            path,
            global_step: 6
        }
    );
    assert_eq!(restored.global_step(), trained.global_step());
    assert_eq!(restored.learning_rate(), trained.learning_rate());
    assert_eq!(restored.snapshot(), trained.snapshot());

    let expected = trained.test(a.clone(), b.clone()).unwrap();
    let got = restored.test(a, b).unwrap();
    assert_eq!(got.fake_a, expected.fake_a);
    assert_eq!(got.fake_b, expected.fake_b);
}

#[test]
fn inference_restores_only_the_generators() {
    let dir = tempfile::tempdir().unwrap();
    let manager = CheckpointManager::new(dir.path(), 5);
    let (a, b) = (batch(1), batch(2));

    let mut trained = CycleGan::for_training(&tiny_model(), &tiny_training(0)).unwrap();
    trained.optimize_parameters(&a, &b).unwrap();
    trained.save(&manager).unwrap();

    let mut inference = CycleGan::for_inference(&tiny_model(), Some(5)).unwrap();
    assert!(matches!(
        inference.restore(&manager).unwrap(),
        RestoreOutcome::Restored { .. }
    ));

    assert_eq!(inference.gen_a2b().params(), trained.gen_a2b().params());
    assert_eq!(inference.gen_b2a().params(), trained.gen_b2a().params());

    let expected = trained.test(a.clone(), b.clone()).unwrap();
    let got = inference.test(a, b).unwrap();
    assert_eq!(got.fake_b, expected.fake_b);
}

#[test]
fn mismatched_checkpoints_fail_without_touching_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let manager = CheckpointManager::new(dir.path(), 5);

    let mut narrow = CycleGan::for_training(&tiny_model(), &tiny_training(0)).unwrap();
    narrow.save(&manager).unwrap();

    let wider = ModelConfig {
        ngf: 3,
        ..tiny_model()
    };
    let mut wide = CycleGan::for_training(&wider, &tiny_training(1)).unwrap();
    let before = wide.snapshot();

    let result = wide.restore(&manager);
    assert!(matches!(
        result,
        Err(OrchestratorError::CheckpointMismatch { .. })
    ));
    assert_eq!(wide.snapshot(), before);
}

#[test]
fn training_models_need_the_full_state() {
    let dir = tempfile::tempdir().unwrap();
    let manager = CheckpointManager::new(dir.path(), 5);

    let mut inference = CycleGan::for_inference(&tiny_model(), Some(0)).unwrap();
    inference.save(&manager).unwrap();

    let mut training = CycleGan::for_training(&tiny_model(), &tiny_training(0)).unwrap();
    let result = training.restore(&manager);
    assert!(matches!(
        result,
        Err(OrchestratorError::CheckpointMismatch { .. })
    ));
}
