mod snapshot;

pub use snapshot::{Snapshot, SnapshotMode, TensorData};

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Subdirectory of the save directory holding the snapshots.
pub const CHECKPOINT_DIR: &str = "checkpoints";

/// Name of the file pointing at the latest snapshot.
pub const POINTER_FILE: &str = "checkpoint";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Pointer {
    latest: Option<String>,
    /// Every snapshot still on disk, oldest first.
    all: Vec<String>,
}

/// Writes and reads snapshots of a directory.
///
/// Every snapshot and the pointer file are written to a temporary file first and renamed into
/// place, and the pointer only moves once the snapshot it names is on disk.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    max_to_keep: usize,
}

impl CheckpointManager {
    /// Creates a new `CheckpointManager`.
    ///
    /// # Arguments
    /// * `save_dir` - The run directory, snapshots live in its `checkpoints` subdirectory.
    /// * `max_to_keep` - The amount of snapshots to keep, 0 keeps all of them.
    pub fn new(save_dir: impl AsRef<Path>, max_to_keep: usize) -> Self {
        Self {
            dir: save_dir.as_ref().join(CHECKPOINT_DIR),
            max_to_keep,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `snapshot` and makes it the latest one.
    ///
    /// # Returns
    /// The path of the written snapshot.
    pub fn save(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let file_name = format!("ckpt-{:010}.safetensors", snapshot.global_step());
        let path = self.dir.join(&file_name);
        write_atomic(&path, &snapshot.encode()?)?;

        let mut pointer = self.read_pointer()?.unwrap_or_default();
        pointer.all.retain(|name| name != &file_name);
        pointer.all.push(file_name.clone());
        pointer.latest = Some(file_name);

        let pruned: Vec<String> = if self.max_to_keep > 0 && pointer.all.len() > self.max_to_keep {
            let excess = pointer.all.len() - self.max_to_keep;
            pointer.all.drain(..excess).collect()
        } else {
            Vec::new()
        };

        write_atomic(&self.dir.join(POINTER_FILE), &serde_json::to_vec_pretty(&pointer)?)?;

        for name in pruned {
            match fs::remove_file(self.dir.join(&name)) {
                Ok(()) => debug!(snapshot = name.as_str(); "pruned old checkpoint"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to prune checkpoint {name}: {e}"),
            }
        }

        Ok(path)
    }

    /// The path of the latest snapshot, if the pointer file exists.
    ///
    /// # Returns
    /// An error if the pointer can't be read or names a snapshot that doesn't exist.
    pub fn latest_checkpoint(&self) -> Result<Option<PathBuf>> {
        let Some(Pointer {
            latest: Some(latest),
            ..
        }) = self.read_pointer()?
        else {
            return Ok(None);
        };

        let path = self.dir.join(latest);
        if !path.is_file() {
            return Err(OrchestratorError::CheckpointCorrupt(format!(
                "the pointer names {}, which doesn't exist",
                path.display()
            )));
        }

        Ok(Some(path))
    }

    /// Reads the latest snapshot.
    ///
    /// # Returns
    /// `None` when nothing was saved yet.
    pub fn load_latest(&self) -> Result<Option<(PathBuf, Snapshot)>> {
        let Some(path) = self.latest_checkpoint()? else {
            return Ok(None);
        };

        let snapshot = Snapshot::decode(&fs::read(&path)?)?;
        Ok(Some((path, snapshot)))
    }

    fn read_pointer(&self) -> Result<Option<Pointer>> {
        match fs::read(self.dir.join(POINTER_FILE)) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                OrchestratorError::CheckpointCorrupt(format!("unreadable pointer file: {e}"))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)
}
