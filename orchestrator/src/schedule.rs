/// Optimizer applications per training iteration: the generator step and one per discriminator.
pub const UPDATES_PER_ITERATION: u64 = 3;

/// Holds the learning rate for `niter` epochs and then decays it linearly to zero over
/// `niter_decay` epochs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearDecay {
    lr: f32,
    niter: usize,
    niter_decay: usize,
}

impl LinearDecay {
    pub fn new(lr: f32, niter: usize, niter_decay: usize) -> Self {
        Self {
            lr,
            niter,
            niter_decay,
        }
    }

    /// The learning rate for `epoch`, clamped at zero once the decay is over.
    pub fn rate(&self, epoch: usize) -> f32 {
        let decayed = epoch.saturating_sub(self.niter);
        if decayed == 0 {
            return self.lr;
        }

        if self.niter_decay == 0 {
            return 0.;
        }

        let fraction = decayed as f64 / self.niter_decay as f64;
        (self.lr as f64 * (1. - fraction).max(0.)) as f32
    }

    /// The epoch a global step falls into.
    #[inline]
    pub fn epoch_of(global_step: u64, batches_per_epoch: usize) -> usize {
        let iterations = global_step / UPDATES_PER_ITERATION;
        (iterations / batches_per_epoch.max(1) as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_then_decays_to_zero() {
        let schedule = LinearDecay::new(0.0002, 100, 100);

        for epoch in 0..100 {
            assert_eq!(schedule.rate(epoch), 0.0002);
        }

        assert_eq!(schedule.rate(100), 0.0002);
        assert!((schedule.rate(150) - 0.0001).abs() < 1e-9);
        assert!((schedule.rate(199) - 0.000002).abs() < 1e-9);
        assert!(schedule.rate(120) > schedule.rate(121));

        for epoch in [200, 201, 500] {
            assert_eq!(schedule.rate(epoch), 0.);
        }
    }

    #[test]
    fn epochs_count_three_updates_per_iteration() {
        assert_eq!(LinearDecay::epoch_of(0, 10), 0);
        assert_eq!(LinearDecay::epoch_of(29, 10), 0);
        assert_eq!(LinearDecay::epoch_of(30, 10), 1);
        assert_eq!(LinearDecay::epoch_of(3 * 10 * 7 + 2, 10), 7);
        assert_eq!(LinearDecay::epoch_of(6, 0), 2);
    }
}
