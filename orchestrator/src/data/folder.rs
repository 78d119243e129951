use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use log::{debug, info};
use rand::{SeedableRng, rngs::StdRng};
use rayon::prelude::*;

use super::{DataSource, Domain, Fetch, Sampler, Split, batches_per_epoch, load_image, stack};
use crate::error::{OrchestratorError, Result};

const EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Streams batches of images from a `trainA/trainB` or `testA/testB` directory pair, decoding
/// every batch in parallel.
#[derive(Debug, Clone)]
pub struct ImageFolderSource {
    paths_a: Vec<PathBuf>,
    paths_b: Vec<PathBuf>,
    sampler_a: Sampler,
    sampler_b: Sampler,
    img_size: usize,
    batch_size: usize,
}

impl ImageFolderSource {
    /// Opens the training images of `data_dir`, shuffled and repeating forever.
    pub fn train(data_dir: &Path, img_size: usize, batch_size: NonZeroUsize, seed: Option<u64>) -> Result<Self> {
        Self::open(data_dir, Split::Train, img_size, batch_size, seed)
    }

    /// Opens the test images of `data_dir`, in directory order and for a single pass.
    pub fn test(data_dir: &Path, img_size: usize, batch_size: NonZeroUsize) -> Result<Self> {
        let mut source = Self::open(data_dir, Split::Test, img_size, batch_size, Some(0))?;
        source.sampler_a = source.sampler_a.sequential().with_max_passes(1);
        source.sampler_b = source.sampler_b.sequential().with_max_passes(1);
        Ok(source)
    }

    fn open(
        data_dir: &Path,
        split: Split,
        img_size: usize,
        batch_size: NonZeroUsize,
        seed: Option<u64>,
    ) -> Result<Self> {
        let paths_a = list_images(&data_dir.join(split.dir_name(Domain::A)), batch_size)?;
        let paths_b = list_images(&data_dir.join(split.dir_name(Domain::B)), batch_size)?;

        info!(
            images_a = paths_a.len(),
            images_b = paths_b.len();
            "opened dataset {}",
            data_dir.display()
        );

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            sampler_a: Sampler::new(paths_a.len(), batch_size, StdRng::from_rng(&mut rng)),
            sampler_b: Sampler::new(paths_b.len(), batch_size, StdRng::from_rng(&mut rng)),
            paths_a,
            paths_b,
            img_size,
            batch_size: batch_size.get(),
        })
    }

    /// The amount of images found for `domain`.
    pub fn len(&self, domain: Domain) -> usize {
        match domain {
            Domain::A => self.paths_a.len(),
            Domain::B => self.paths_b.len(),
        }
    }
}

impl DataSource for ImageFolderSource {
    fn next_batch(&mut self, domain: Domain) -> Result<Fetch> {
        let (sampler, paths) = match domain {
            Domain::A => (&mut self.sampler_a, &self.paths_a),
            Domain::B => (&mut self.sampler_b, &self.paths_b),
        };

        let Some(indices) = sampler.next_indices() else {
            return Ok(Fetch::EndOfEpoch);
        };

        let img_size = self.img_size;
        let images = indices
            .par_iter()
            .map(|&i| load_image(&paths[i], img_size))
            .collect::<Result<Vec<_>>>()?;

        debug!(size = images.len(); "decoded a batch of domain {domain:?}");
        Ok(Fetch::Batch(stack(&images)?))
    }

    fn batches_per_epoch(&self) -> usize {
        batches_per_epoch(self.paths_a.len(), self.paths_b.len(), self.batch_size)
    }
}

/// Every image file directly under `dir`, sorted by name.
fn list_images(dir: &Path, batch_size: NonZeroUsize) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));

        if is_image && path.is_file() {
            paths.push(path);
        }
    }

    if paths.len() < batch_size.get() {
        return Err(OrchestratorError::InvalidConfig(format!(
            "{} holds {} image(s), fewer than a batch of {batch_size}",
            dir.display(),
            paths.len()
        )));
    }

    paths.sort();
    Ok(paths)
}
