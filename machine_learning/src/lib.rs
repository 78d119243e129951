pub mod arch;
pub mod autodiff;
pub mod error;
pub mod initialization;
pub mod optimization;

pub use error::{MlErr, Result};
