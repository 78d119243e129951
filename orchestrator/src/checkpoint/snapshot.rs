use std::collections::{BTreeMap, BTreeSet, HashMap};

use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::error::{OrchestratorError, Result};

const GLOBAL_STEP: &str = "state/global_step";
const FORMAT_VERSION: &str = "1";

/// Whether a snapshot holds the full training state or only the generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMode {
    Training,
    Inference,
}

impl SnapshotMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Inference => "inference",
        }
    }
}

/// A single named f32 tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// An immutable set of named tensors plus the global step they were taken at.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    global_step: u64,
    mode: SnapshotMode,
    tensors: BTreeMap<String, TensorData>,
}

impl Snapshot {
    pub fn new(global_step: u64, mode: SnapshotMode) -> Self {
        Self {
            global_step,
            mode,
            tensors: BTreeMap::new(),
        }
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub fn mode(&self) -> SnapshotMode {
        self.mode
    }

    pub fn insert(&mut self, name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) {
        self.tensors
            .insert(name.into(), TensorData { shape, values });
    }

    pub fn get(&self, name: &str) -> Option<&TensorData> {
        self.tensors.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Checks that every expected tensor is present with the expected shape, and that no tensor
    /// under one of the `owned` prefixes is left unexpected.
    ///
    /// # Returns
    /// A `CheckpointMismatch` error describing the first offending tensor.
    pub fn verify(&self, expected: &[(String, Vec<usize>)], owned: &[&str]) -> Result<()> {
        let mut names = BTreeSet::new();

        for (name, shape) in expected {
            let tensor = self.get(name).ok_or_else(|| mismatch(name, "missing from checkpoint"))?;

            if &tensor.shape != shape {
                return Err(mismatch(
                    name,
                    format!("shape {:?} in checkpoint, {shape:?} in model", tensor.shape),
                ));
            }

            names.insert(name.as_str());
        }

        let unexpected = self.names().find(|name| {
            !names.contains(name) && owned.iter().any(|prefix| name.starts_with(*prefix))
        });

        match unexpected {
            Some(name) => Err(mismatch(name, "not present in model")),
            None => Ok(()),
        }
    }

    /// Serializes the snapshot in the safetensors format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let step = self.global_step.to_le_bytes();
        let mut views = Vec::with_capacity(self.tensors.len() + 1);
        views.push((
            GLOBAL_STEP.to_owned(),
            TensorView::new(Dtype::U64, vec![1], &step)?,
        ));

        for (name, tensor) in &self.tensors {
            let data: &[u8] = bytemuck::cast_slice(&tensor.values);
            views.push((
                name.clone(),
                TensorView::new(Dtype::F32, tensor.shape.clone(), data)?,
            ));
        }

        let metadata = HashMap::from([
            ("format".to_owned(), FORMAT_VERSION.to_owned()),
            ("mode".to_owned(), self.mode.as_str().to_owned()),
        ]);

        Ok(safetensors::serialize(views, &Some(metadata))?)
    }

    /// Deserializes a snapshot written by `encode`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (_, metadata) = SafeTensors::read_metadata(bytes)?;
        let info = metadata.metadata().clone().unwrap_or_default();

        match info.get("format").map(String::as_str) {
            Some(FORMAT_VERSION) => {}
            other => {
                return Err(OrchestratorError::CheckpointCorrupt(format!(
                    "unsupported format version {other:?}"
                )));
            }
        }

        let mode = match info.get("mode").map(String::as_str) {
            Some("inference") => SnapshotMode::Inference,
            _ => SnapshotMode::Training,
        };

        let tensors = SafeTensors::deserialize(bytes)?;
        let mut global_step = None;
        let mut snapshot = Self::new(0, mode);

        for (name, view) in tensors.tensors() {
            if name == GLOBAL_STEP {
                let bytes: [u8; 8] = view.data().try_into().map_err(|_| {
                    OrchestratorError::CheckpointCorrupt("malformed global step".into())
                })?;
                global_step = Some(u64::from_le_bytes(bytes));
                continue;
            }

            if view.dtype() != Dtype::F32 {
                return Err(mismatch(&name, format!("dtype {:?}, expected F32", view.dtype())));
            }

            let values = bytemuck::pod_collect_to_vec::<u8, f32>(view.data());
            snapshot.insert(name, view.shape().to_vec(), values);
        }

        snapshot.global_step = global_step
            .ok_or_else(|| OrchestratorError::CheckpointCorrupt(format!("{GLOBAL_STEP} is missing")))?;

        Ok(snapshot)
    }
}

fn mismatch(tensor: &str, reason: impl Into<String>) -> OrchestratorError {
    OrchestratorError::CheckpointMismatch {
        tensor: tensor.to_owned(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new(42, SnapshotMode::Training);
        snapshot.insert("net/0.weight", vec![2, 3], vec![0.1, -0.2, 0.3, f32::MIN_POSITIVE, 5., -6.]);
        snapshot.insert("net/0.bias", vec![3], vec![0., 1., 2.]);
        snapshot
    }

    #[test]
    fn decodes_what_it_encodes() {
        let snapshot = sample();
        let decoded = Snapshot::decode(&snapshot.encode().unwrap()).unwrap();

        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.global_step(), 42);
    }

    #[test]
    fn verify_reports_missing_and_reshaped_tensors() {
        let snapshot = sample();
        let ok = vec![
            ("net/0.weight".to_owned(), vec![2, 3]),
            ("net/0.bias".to_owned(), vec![3]),
        ];
        assert!(snapshot.verify(&ok, &["net/"]).is_ok());

        let reshaped = vec![("net/0.weight".to_owned(), vec![3, 3])];
        assert!(matches!(
            snapshot.verify(&reshaped, &[]),
            Err(OrchestratorError::CheckpointMismatch { tensor, .. }) if tensor == "net/0.weight"
        ));

        let missing = vec![("net/1.weight".to_owned(), vec![1])];
        assert!(snapshot.verify(&missing, &[]).is_err());

        let partial = vec![("net/0.weight".to_owned(), vec![2, 3])];
        assert!(matches!(
            snapshot.verify(&partial, &["net/"]),
            Err(OrchestratorError::CheckpointMismatch { tensor, .. }) if tensor == "net/0.bias"
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Snapshot::decode(b"not a checkpoint").is_err());
    }
}
