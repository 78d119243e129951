pub mod activations;
pub mod layers;
pub mod loss;
mod mode;
mod network;
mod sequential;
mod tensor;

pub use mode::Mode;
pub use network::Network;
pub use sequential::Sequential;
pub use tensor::{ParamKind, TensorInfo};
