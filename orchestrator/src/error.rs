use std::{fmt, io};

use machine_learning::MlErr;

/// All errors that can occur in the orchestrator.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before any tensor is allocated.
    InvalidConfig(String),
    /// A checkpoint exists but doesn't fit the constructed networks.
    CheckpointMismatch { tensor: String, reason: String },
    /// A checkpoint or its pointer file can't be decoded.
    CheckpointCorrupt(String),
    /// A training operation was requested on an inference-only model.
    NotTraining(&'static str),
    /// The model was shut down and can't be used anymore.
    Terminated,
    /// A numeric error from the machine learning core.
    Ml(MlErr),
    /// An image couldn't be decoded or encoded.
    Image(image::ImageError),
    /// A JSON document couldn't be read or written.
    Json(serde_json::Error),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

/// The result type used in the entire orchestrator.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::CheckpointMismatch { tensor, reason } => {
                write!(f, "checkpoint doesn't match the model at {tensor}: {reason}")
            }
            Self::CheckpointCorrupt(msg) => write!(f, "corrupt checkpoint: {msg}"),
            Self::NotTraining(op) => write!(f, "{op} requires a model built for training"),
            Self::Terminated => write!(f, "the model was already shut down"),
            Self::Ml(e) => write!(f, "{e}"),
            Self::Image(e) => write!(f, "image error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ml(e) => Some(e),
            Self::Image(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<MlErr> for OrchestratorError {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<image::ImageError> for OrchestratorError {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<safetensors::SafeTensorError> for OrchestratorError {
    fn from(e: safetensors::SafeTensorError) -> Self {
        Self::CheckpointCorrupt(e.to_string())
    }
}
