mod folder;
mod imaging;
mod memory;
mod sampler;

pub use folder::ImageFolderSource;
pub use imaging::{load_image, save_image, to_rgb};
pub use memory::InMemorySource;
pub use sampler::Sampler;

use machine_learning::MlErr;
use ndarray::{Array3, Array4, ArrayView3, Axis};

use crate::error::Result;

/// One of the two unpaired image collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    A,
    B,
}

/// Which half of a dataset directory to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    /// The subdirectory holding the images of `domain`.
    pub fn dir_name(&self, domain: Domain) -> &'static str {
        match (self, domain) {
            (Split::Train, Domain::A) => "trainA",
            (Split::Train, Domain::B) => "trainB",
            (Split::Test, Domain::A) => "testA",
            (Split::Test, Domain::B) => "testB",
        }
    }
}

/// The outcome of asking a source for a batch.
#[derive(Debug, Clone)]
pub enum Fetch {
    /// A `[batch, h, w, c]` batch normalized to `[-1, 1]`.
    Batch(Array4<f32>),
    EndOfEpoch,
}

/// Delivers fixed size batches of images per domain.
pub trait DataSource {
    /// Blocks until the next batch of `domain` is ready.
    ///
    /// # Returns
    /// The batch, `Fetch::EndOfEpoch` if the source is exhausted, or an error if an image
    /// couldn't be read.
    fn next_batch(&mut self, domain: Domain) -> Result<Fetch>;

    /// The amount of iterations that make up one epoch.
    fn batches_per_epoch(&self) -> usize;
}

/// Iterations per epoch for two domains of `len_a` and `len_b` images, never 0.
pub fn batches_per_epoch(len_a: usize, len_b: usize, batch_size: usize) -> usize {
    ((len_a + len_b) / (2 * batch_size.max(1))).max(1)
}

fn stack(images: &[Array3<f32>]) -> Result<Array4<f32>> {
    let views: Vec<ArrayView3<f32>> = images.iter().map(Array3::view).collect();
    let batch = ndarray::stack(Axis(0), &views).map_err(MlErr::from)?;
    Ok(batch)
}
