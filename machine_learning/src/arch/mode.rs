/// Whether a forward pass is part of training or of inference.
///
/// Only dropout behaves differently between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Training,
    Inference,
}
