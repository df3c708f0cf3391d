use crate::DType;

/// Errors raised by the host tensor runtime.
#[derive(Debug, thiserror::Error)]
pub enum NormaError {
    #[error("DType mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    #[error("Unsupported dtype: {0}")]
    UnsupportedDType(DType),

    #[error("Invalid axis {axis} for tensor with {ndim} dimensions")]
    InvalidAxis { axis: usize, ndim: usize },

    #[error("Storage error: {0}")]
    StorageError(String),
}
