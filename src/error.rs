use std::fmt;

/// Result type for Pallas operations
pub type Result<T> = std::result::Result<T, PallasError>;

/// Main error type for the Pallas library
///
/// Every variant is raised synchronously at the point of violation and is
/// never retried internally.
#[derive(Debug, Clone)]
pub enum PallasError {
    /// Malformed or missing configuration fields
    Configuration(String),

    /// Parameter or tensor shape inconsistent with a declared contract
    ShapeMismatch {
        expected: String,
        actual: String,
    },

    /// Input tensor of a rank the layer does not support
    InvalidInputShape {
        layer: String,
        expected_rank: usize,
        actual_rank: usize,
    },

    /// Operation not supported by this component (e.g. multiple named inputs)
    UnsupportedOperation(String),

    /// A required precondition does not hold
    PreconditionViolation(String),

    /// IO errors (file operations)
    IoError(String),

    /// Serialization/deserialization errors
    SerializationError(String),

    /// Numerical computation errors
    NumericalError(String),

    /// Empty buffer or container
    EmptyBuffer(String),
}

impl fmt::Display for PallasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PallasError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            PallasError::ShapeMismatch { expected, actual } => {
                write!(f, "Shape mismatch: expected {}, got {}", expected, actual)
            }
            PallasError::InvalidInputShape { layer, expected_rank, actual_rank } => {
                write!(
                    f,
                    "Invalid input rank for {} layer: {}, must be {}",
                    layer, actual_rank, expected_rank
                )
            }
            PallasError::UnsupportedOperation(msg) => write!(f, "Unsupported operation: {}", msg),
            PallasError::PreconditionViolation(msg) => write!(f, "Precondition violated: {}", msg),
            PallasError::IoError(msg) => write!(f, "IO error: {}", msg),
            PallasError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            PallasError::NumericalError(msg) => write!(f, "Numerical error: {}", msg),
            PallasError::EmptyBuffer(msg) => write!(f, "Empty buffer: {}", msg),
        }
    }
}

impl std::error::Error for PallasError {}

impl From<std::io::Error> for PallasError {
    fn from(err: std::io::Error) -> Self {
        PallasError::IoError(err.to_string())
    }
}

impl From<bincode::Error> for PallasError {
    fn from(err: bincode::Error) -> Self {
        PallasError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for PallasError {
    fn from(err: serde_json::Error) -> Self {
        PallasError::Configuration(err.to_string())
    }
}

impl From<ndarray::ShapeError> for PallasError {
    fn from(err: ndarray::ShapeError) -> Self {
        PallasError::ShapeMismatch {
            expected: "a compatible shape".to_string(),
            actual: err.to_string(),
        }
    }
}

// Helper functions for common error patterns
impl PallasError {
    pub fn shape_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        PallasError::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        PallasError::Configuration(msg.into())
    }

    pub fn invalid_rank<S: Into<String>>(layer: S, expected_rank: usize, actual_rank: usize) -> Self {
        PallasError::InvalidInputShape {
            layer: layer.into(),
            expected_rank,
            actual_rank,
        }
    }
}
