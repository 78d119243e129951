use std::num::NonZeroUsize;

use machine_learning::MlErr;
use ndarray::{Array3, Array4, ArrayView4, Axis};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::error::Result;

/// Probability of answering with a stored image instead of the fresh one.
pub const SWAP_PROB: f64 = 0.5;

/// A rolling store of previously generated images a discriminator is trained against.
///
/// The buffer never holds more than `capacity` images. Once full, every new image overwrites a
/// uniformly chosen slot.
#[derive(Debug, Clone)]
pub struct ImageHistoryBuffer<R: Rng = StdRng> {
    capacity: NonZeroUsize,
    images: Vec<Array3<f32>>,
    rng: R,
}

impl ImageHistoryBuffer<StdRng> {
    /// Creates a new buffer drawing randomness from the operating system.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self::with_rng(capacity, StdRng::from_os_rng())
    }
}

impl<R: Rng> ImageHistoryBuffer<R> {
    /// Creates a new buffer with its own source of randomness.
    ///
    /// # Arguments
    /// * `capacity` - The maximum amount of images to remember.
    /// * `rng` - The random number generator used to swap and replace images.
    pub fn with_rng(capacity: NonZeroUsize, rng: R) -> Self {
        Self {
            capacity,
            images: Vec::with_capacity(capacity.get()),
            rng,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Mixes a batch of fresh fakes with the history, remembering every fresh image.
    ///
    /// # Arguments
    /// * `fakes` - The images the generator just produced, `[batch, h, w, c]`.
    ///
    /// # Returns
    /// A batch of the same shape where every image is either the fresh one or a stored one, or
    /// an error if the images don't have the shape of the stored ones.
    pub fn query(&mut self, fakes: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (_, h, w, c) = fakes.dim();
        if let Some(stored) = self.images.first() {
            if stored.dim() != (h, w, c) {
                return Err(MlErr::ShapeMismatch {
                    what: "history buffer image",
                    got: vec![h, w, c],
                    expected: stored.shape().to_vec(),
                }
                .into());
            }
        }

        let mut out = fakes.to_owned();

        for (fresh, mut slot) in fakes.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
            if !self.images.is_empty() && self.rng.random_bool(SWAP_PROB) {
                let i = self.rng.random_range(0..self.images.len());
                slot.assign(&self.images[i]);
            }

            self.remember(fresh.to_owned());
        }

        Ok(out)
    }

    fn remember(&mut self, image: Array3<f32>) {
        if self.images.len() < self.capacity.get() {
            self.images.push(image);
        } else {
            let i = self.rng.random_range(0..self.images.len());
            self.images[i] = image;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(value: f32, n: usize) -> Array4<f32> {
        Array4::from_elem((n, 2, 2, 3), value)
    }

    fn buffer(capacity: usize) -> ImageHistoryBuffer<StdRng> {
        ImageHistoryBuffer::with_rng(NonZeroUsize::new(capacity).unwrap(), StdRng::seed_from_u64(42))
    }

    #[test]
    fn empty_buffer_returns_the_fresh_batch() {
        let mut buffer = buffer(10);
        let fakes = Array4::from_shape_fn((4, 2, 2, 3), |(b, y, x, c)| (b + y + x + c) as f32);

        assert_eq!(buffer.query(fakes.view()).unwrap(), fakes);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn never_holds_more_than_capacity() {
        for capacity in [1, 3, 7] {
            let mut buffer = buffer(capacity);

            for i in 0..2 * capacity + 1 {
                buffer.query(batch(i as f32, 2).view()).unwrap();
                assert!(buffer.len() <= capacity);
            }

            assert_eq!(buffer.len(), capacity);
        }
    }

    #[test]
    fn outputs_are_fresh_or_remembered_images() {
        let mut buffer = buffer(5);
        let mut seen = vec![];
        let mut swapped = 0;

        for i in 0..50 {
            let out = buffer.query(batch(i as f32, 1).view()).unwrap();
            let value = out[[0, 0, 0, 0]];
            assert!(out.iter().all(|&v| v == value));
            assert!(value == i as f32 || seen.contains(&value));
            if value != i as f32 {
                swapped += 1;
            }
            seen.push(i as f32);
        }

        // with p = 0.5 over 49 non-empty queries, never or always swapping is implausible
        assert!(swapped > 5 && swapped < 45, "swapped {swapped} times");
    }

    #[test]
    fn same_seed_gives_same_answers() {
        let mut a = buffer(3);
        let mut b = buffer(3);

        for i in 0..20 {
            let fakes = batch(i as f32, 2);
            assert_eq!(a.query(fakes.view()).unwrap(), b.query(fakes.view()).unwrap());
        }
    }

    #[test]
    fn rejects_images_of_another_shape() {
        let mut buffer = buffer(3);
        buffer.query(batch(0., 1).view()).unwrap();

        assert!(buffer.query(Array4::zeros((1, 4, 4, 3)).view()).is_err());
    }
}
