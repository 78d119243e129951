use std::{fmt, time::Duration};

/// The losses of one generator step.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct GeneratorLosses {
    pub gen_a2b: f32,
    pub gen_b2a: f32,
    pub cycle_a: f32,
    pub cycle_b: f32,
    pub identity_a: f32,
    pub identity_b: f32,
}

impl GeneratorLosses {
    /// The loss both generators were jointly optimized on.
    pub fn total(&self) -> f32 {
        self.gen_a2b + self.gen_b2a + self.cycle_a + self.cycle_b + self.identity_a + self.identity_b
    }
}

/// The losses of one discriminator step.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DiscriminatorLosses {
    pub disc_a: f32,
    pub disc_b: f32,
}

/// Everything a training iteration reports.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct StepLosses {
    pub generator: GeneratorLosses,
    pub discriminator: DiscriminatorLosses,
}

impl fmt::Display for StepLosses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let GeneratorLosses {
            gen_a2b,
            gen_b2a,
            cycle_a,
            cycle_b,
            identity_a,
            identity_b,
        } = self.generator;
        let DiscriminatorLosses { disc_a, disc_b } = self.discriminator;

        write!(
            f,
            "gen_a2b {gen_a2b:.4} gen_b2a {gen_b2a:.4} cyc_a {cycle_a:.4} cyc_b {cycle_b:.4} \
             id_a {identity_a:.4} id_b {identity_b:.4} disc_a {disc_a:.4} disc_b {disc_b:.4}"
        )
    }
}

/// Running totals over one epoch.
#[derive(Debug, Default, Clone)]
pub struct EpochMetrics {
    pub iterations: u64,
    pub compute_time: Duration,
    sum: StepLosses,
}

impl EpochMetrics {
    #[inline]
    pub fn record(&mut self, losses: &StepLosses, elapsed: Duration) {
        let g = &mut self.sum.generator;
        g.gen_a2b += losses.generator.gen_a2b;
        g.gen_b2a += losses.generator.gen_b2a;
        g.cycle_a += losses.generator.cycle_a;
        g.cycle_b += losses.generator.cycle_b;
        g.identity_a += losses.generator.identity_a;
        g.identity_b += losses.generator.identity_b;

        let d = &mut self.sum.discriminator;
        d.disc_a += losses.discriminator.disc_a;
        d.disc_b += losses.discriminator.disc_b;

        self.iterations += 1;
        self.compute_time += elapsed;
    }

    /// The average losses of the recorded iterations.
    pub fn mean(&self) -> StepLosses {
        let n = self.iterations.max(1) as f32;
        let (g, d) = (&self.sum.generator, &self.sum.discriminator);

        StepLosses {
            generator: GeneratorLosses {
                gen_a2b: g.gen_a2b / n,
                gen_b2a: g.gen_b2a / n,
                cycle_a: g.cycle_a / n,
                cycle_b: g.cycle_b / n,
                identity_a: g.identity_a / n,
                identity_b: g.identity_b / n,
            },
            discriminator: DiscriminatorLosses {
                disc_a: d.disc_a / n,
                disc_b: d.disc_b / n,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_recorded_iterations() {
        let mut metrics = EpochMetrics::default();
        let mut losses = StepLosses::default();

        losses.generator.cycle_a = 2.;
        losses.discriminator.disc_b = 1.;
        metrics.record(&losses, Duration::from_millis(10));
        losses.generator.cycle_a = 4.;
        losses.discriminator.disc_b = 0.;
        metrics.record(&losses, Duration::from_millis(30));

        let mean = metrics.mean();
        assert_eq!(metrics.iterations, 2);
        assert_eq!(metrics.compute_time, Duration::from_millis(40));
        assert_eq!(mean.generator.cycle_a, 3.);
        assert_eq!(mean.discriminator.disc_b, 0.5);
        assert_eq!(mean.generator.total(), 3.);
    }
}
