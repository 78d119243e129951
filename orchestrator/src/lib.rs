pub mod buffer;
pub mod checkpoint;
pub mod configs;
pub mod cyclegan;
pub mod data;
pub mod error;
pub mod metrics;
pub mod schedule;
pub mod session;

pub use cyclegan::CycleGan;
pub use error::{OrchestratorError, Result};
pub use session::{StopHandle, TestReport, TrainingReport, test, train};
