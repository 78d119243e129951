use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;
use rand_distr::NormalError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    InputTooSmall {
        size: usize,
        kernel: usize,
    },
    CacheMismatch {
        layer: &'static str,
    },
    UnknownNetwork(String),
    DuplicateNetwork(String),
    UnknownVar(usize),
    Reshape(String),
    Init(String),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => format!("There's a size mismatch in {what}, got {got} and expected {expected}"),
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => format!("There's a shape mismatch in {what}, got {got:?} and expected {expected:?}"),
            MlErr::InputTooSmall { size, kernel } => format!(
                "The padded input of spatial size {size} is smaller than the kernel of size {kernel}"
            ),
            MlErr::CacheMismatch { layer } => {
                format!("The recorded activations don't belong to a {layer} layer")
            }
            MlErr::UnknownNetwork(name) => format!("The network {name} was not provided"),
            MlErr::DuplicateNetwork(name) => {
                format!("The network {name} is already registered")
            }
            MlErr::UnknownVar(id) => format!("The variable {id} wasn't recorded on this tape"),
            MlErr::Reshape(e) => format!("Failed to reshape a tensor: {e}"),
            MlErr::Init(e) => format!("Failed to initialize parameters: {e}"),
        };

        write!(f, "{s}")
    }
}

impl Error for MlErr {}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Reshape(value.to_string())
    }
}

impl From<NormalError> for MlErr {
    fn from(value: NormalError) -> Self {
        Self::Init(value.to_string())
    }
}
