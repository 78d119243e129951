use std::num::NonZeroUsize;

use rand::{rngs::StdRng, seq::SliceRandom};

/// Walks the indices of a collection in batches, reshuffling once per full pass.
///
/// Incomplete trailing batches are dropped.
#[derive(Debug, Clone)]
pub struct Sampler {
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
    passes: usize,
    max_passes: Option<usize>,
    shuffle: bool,
    rng: StdRng,
}

impl Sampler {
    /// Creates a new `Sampler`.
    ///
    /// # Arguments
    /// * `len` - The size of the collection.
    /// * `batch_size` - The amount of indices per batch.
    /// * `rng` - The source of the per pass shuffle.
    pub fn new(len: usize, batch_size: NonZeroUsize, rng: StdRng) -> Self {
        Self {
            order: (0..len).collect(),
            batch_size: batch_size.get(),
            cursor: 0,
            passes: 0,
            max_passes: None,
            shuffle: true,
            rng,
        }
    }

    /// Stops after `passes` full passes instead of repeating forever.
    pub fn with_max_passes(mut self, passes: usize) -> Self {
        self.max_passes = Some(passes);
        self
    }

    /// Keeps the collection order on every pass.
    pub fn sequential(mut self) -> Self {
        self.shuffle = false;
        self
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The amount of passes started so far.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// The indices of the next batch, or `None` once exhausted.
    pub fn next_indices(&mut self) -> Option<&[usize]> {
        if self.batch_size > self.order.len() {
            return None;
        }

        if self.passes == 0 || self.cursor + self.batch_size > self.order.len() {
            if self.max_passes.is_some_and(|max| self.passes >= max) {
                return None;
            }

            if self.shuffle {
                self.order.shuffle(&mut self.rng);
            }

            self.passes += 1;
            self.cursor = 0;
        }

        let start = self.cursor;
        self.cursor += self.batch_size;
        Some(&self.order[start..self.cursor])
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn sampler(len: usize, batch_size: usize) -> Sampler {
        Sampler::new(
            len,
            NonZeroUsize::new(batch_size).unwrap(),
            StdRng::seed_from_u64(7),
        )
    }

    #[test]
    fn every_index_is_visited_once_per_pass() {
        let mut sampler = sampler(6, 2);

        let mut seen: Vec<usize> = (0..3)
            .flat_map(|_| sampler.next_indices().unwrap().to_vec())
            .collect();
        seen.sort();

        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(sampler.passes(), 1);

        sampler.next_indices().unwrap();
        assert_eq!(sampler.passes(), 2);
    }

    #[test]
    fn drops_incomplete_batches() {
        let mut sampler = sampler(5, 2).with_max_passes(1);

        assert!(sampler.next_indices().is_some());
        assert!(sampler.next_indices().is_some());
        assert!(sampler.next_indices().is_none());
        assert!(sampler.next_indices().is_none());
    }

    #[test]
    fn sequential_keeps_the_order() {
        let mut sampler = sampler(4, 2).sequential();

        assert_eq!(sampler.next_indices().unwrap(), &[0, 1]);
        assert_eq!(sampler.next_indices().unwrap(), &[2, 3]);
        assert_eq!(sampler.next_indices().unwrap(), &[0, 1]);
    }

    #[test]
    fn too_small_collections_yield_nothing() {
        let mut sampler = sampler(1, 2);
        assert!(sampler.next_indices().is_none());
    }
}
