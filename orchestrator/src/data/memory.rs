use std::num::NonZeroUsize;

use ndarray::Array3;
use rand::{SeedableRng, rngs::StdRng};

use super::{DataSource, Domain, Fetch, Sampler, batches_per_epoch, stack};
use crate::error::{OrchestratorError, Result};

/// Serves batches out of images already held in memory.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    images_a: Vec<Array3<f32>>,
    images_b: Vec<Array3<f32>>,
    sampler_a: Sampler,
    sampler_b: Sampler,
    batch_size: usize,
}

impl InMemorySource {
    /// Creates a new `InMemorySource`.
    ///
    /// # Arguments
    /// * `images_a` - The `[h, w, c]` images of domain A.
    /// * `images_b` - The `[h, w, c]` images of domain B.
    /// * `batch_size` - The amount of images per batch.
    /// * `seed` - Seeds the shuffles, the operating system is used if `None`.
    ///
    /// # Returns
    /// An error if a domain can't fill a single batch.
    pub fn new(
        images_a: Vec<Array3<f32>>,
        images_b: Vec<Array3<f32>>,
        batch_size: NonZeroUsize,
        seed: Option<u64>,
    ) -> Result<Self> {
        for (domain, len) in [(Domain::A, images_a.len()), (Domain::B, images_b.len())] {
            if len < batch_size.get() {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "domain {domain:?} holds {len} image(s), fewer than a batch of {batch_size}"
                )));
            }
        }

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            sampler_a: Sampler::new(images_a.len(), batch_size, StdRng::from_rng(&mut rng)),
            sampler_b: Sampler::new(images_b.len(), batch_size, StdRng::from_rng(&mut rng)),
            images_a,
            images_b,
            batch_size: batch_size.get(),
        })
    }

    /// Reports the end of the epoch after `passes` full passes over a domain.
    pub fn with_max_passes(mut self, passes: usize) -> Self {
        self.sampler_a = self.sampler_a.with_max_passes(passes);
        self.sampler_b = self.sampler_b.with_max_passes(passes);
        self
    }
}

impl DataSource for InMemorySource {
    fn next_batch(&mut self, domain: Domain) -> Result<Fetch> {
        let (sampler, images) = match domain {
            Domain::A => (&mut self.sampler_a, &self.images_a),
            Domain::B => (&mut self.sampler_b, &self.images_b),
        };

        let Some(indices) = sampler.next_indices() else {
            return Ok(Fetch::EndOfEpoch);
        };

        let batch: Vec<_> = indices.iter().map(|&i| images[i].clone()).collect();
        Ok(Fetch::Batch(stack(&batch)?))
    }

    fn batches_per_epoch(&self) -> usize {
        batches_per_epoch(self.images_a.len(), self.images_b.len(), self.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images(len: usize, value: f32) -> Vec<Array3<f32>> {
        (0..len)
            .map(|i| Array3::from_elem((2, 2, 3), value + i as f32))
            .collect()
    }

    #[test]
    fn serves_batches_of_each_domain() {
        let batch_size = NonZeroUsize::new(2).unwrap();
        let mut source = InMemorySource::new(images(4, 0.), images(6, 100.), batch_size, Some(1)).unwrap();

        assert_eq!(source.batches_per_epoch(), 2);

        let Fetch::Batch(a) = source.next_batch(Domain::A).unwrap() else {
            panic!("expected a batch");
        };
        let Fetch::Batch(b) = source.next_batch(Domain::B).unwrap() else {
            panic!("expected a batch");
        };

        assert_eq!(a.dim(), (2, 2, 2, 3));
        assert!(a.iter().all(|&x| x < 100.));
        assert!(b.iter().all(|&x| x >= 100.));
    }

    #[test]
    fn reports_exhaustion_with_a_pass_limit() {
        let batch_size = NonZeroUsize::new(2).unwrap();
        let mut source = InMemorySource::new(images(2, 0.), images(2, 0.), batch_size, Some(1))
            .unwrap()
            .with_max_passes(1);

        assert!(matches!(source.next_batch(Domain::A).unwrap(), Fetch::Batch(_)));
        assert!(matches!(source.next_batch(Domain::A).unwrap(), Fetch::EndOfEpoch));
        assert!(matches!(source.next_batch(Domain::B).unwrap(), Fetch::Batch(_)));
    }

    #[test]
    fn rejects_domains_smaller_than_a_batch() {
        let batch_size = NonZeroUsize::new(3).unwrap();
        let result = InMemorySource::new(images(2, 0.), images(5, 0.), batch_size, None);
        assert!(matches!(result, Err(OrchestratorError::InvalidConfig(_))));
    }
}
