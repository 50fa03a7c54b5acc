//! Error types shared by the marshaller, the arena bridge and the engine.

use thiserror::Error;

/// Reasons a dataset is rejected before any buffer is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("dataset is empty; at least one point is required")]
    Empty,
    #[error("dataset is not two-dimensional: element {index} is not a sequence of numbers")]
    NotTwoDimensional { index: usize },
    #[error("point {index} has zero dimensions; every point needs at least one value")]
    ZeroDimensions { index: usize },
    #[error("point {index} has {found} dimensions but point 0 has {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("point {index} holds a non-finite value at dimension {dimension}")]
    NonFinite { index: usize, dimension: usize },
}

impl ValidationError {
    /// Index of the offending point.
    pub fn index(&self) -> Option<usize> {
        match self {
            ValidationError::Empty => None,
            ValidationError::NotTwoDimensional { index }
            | ValidationError::ZeroDimensions { index }
            | ValidationError::DimensionMismatch { index, .. }
            | ValidationError::NonFinite { index, .. } => Some(*index),
        }
    }
}

/// Error type used by operations in this crate.
#[derive(Debug, Error)]
pub enum KMeansError {
    #[error("invalid data: {0}")]
    Validation(#[from] ValidationError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unsupported numeric type: {0}")]
    UnsupportedType(String),
    #[error("arena could not grow to {requested} bytes: {reason}")]
    Allocation { requested: usize, reason: String },
    #[error("engine call failed: {0}")]
    Engine(String),
    #[error("engine initialisation failed: {0}")]
    Initialization(String),
    #[error("engine is not initialised; call init() before predict()")]
    NotInitialized,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

/// Convenient alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, KMeansError>;
