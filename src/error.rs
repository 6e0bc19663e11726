//! Error types for the crate

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, NnError>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum NnError {
    /// Invalid hyperparameter or missing collaborator
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Train/predict/validation called before `compile`
    #[error("Model must be compiled before calling {0}")]
    NotCompiled(&'static str),

    /// Structural change attempted after `compile`
    #[error("Model is already compiled, cannot {0}")]
    AlreadyCompiled(&'static str),

    /// Gradient or update operation on a frozen layer
    #[error("Layer is frozen, cannot {0}")]
    FrozenLayer(&'static str),

    /// Parameters requested before the first forward pass
    #[error("Layer has not been initialized by a forward pass")]
    Uninitialized,

    /// Tensor shapes do not line up
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Inputs and targets disagree on the number of samples
    #[error("Sample count mismatch: {inputs} inputs vs {targets} targets")]
    SampleCountMismatch { inputs: usize, targets: usize },

    /// Class label outside `[0, classes)`
    #[error("Label {label} at row {row} is outside [0, {classes})")]
    LabelOutOfRange {
        row: usize,
        label: usize,
        classes: usize,
    },

    /// Dense targets given to a label loss or vice versa
    #[error("Unsupported targets: {0}")]
    TargetKind(String),

    /// Zero-row batch where at least one sample is required
    #[error("Empty batch passed to {0}")]
    EmptyBatch(&'static str),

    /// Backward called without any cached forward pass
    #[error("Backward called with an empty forward cache")]
    EmptyCache,

    /// Backward called with a gradient count that does not match the cache
    #[error("Backward received {received} gradients but {cached} forward passes are cached")]
    CacheMismatch { cached: usize, received: usize },

    /// Training started while a layer still holds forward passes from a manual call
    #[error("Layer {layer} holds {cached} cached forward passes from outside training")]
    PendingCache { layer: usize, cached: usize },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file parse error
    #[error("Failed to parse config: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// Configuration serialization error
    #[error("Failed to serialize config: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl NnError {
    pub(crate) fn shape(context: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        NnError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
