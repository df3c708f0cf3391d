//! Dispatch-layer errors.

use norma_core::{DType, NormaError};

/// Errors raised while validating, resolving or launching a fused forward.
///
/// None of these are retried: they describe a call that was built wrong
/// (or an allocator failure, passed through unchanged).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Type not supported: {0}")]
    UnsupportedType(DType),

    #[error(
        "FWD: Unsupported hidden_size or types: hidden_size={hidden_size}, \
         wtype={wtype}, itype={itype}, rtype={rtype}, otype={otype}, ctype={ctype}"
    )]
    UnsupportedConfig {
        hidden_size: u32,
        wtype: DType,
        itype: DType,
        rtype: DType,
        otype: DType,
        ctype: DType,
    },

    #[error("Precondition violated for `{arg}`: {reason}")]
    Precondition { arg: &'static str, reason: String },

    #[error("Kernel launch failed: {0}")]
    Kernel(String),

    #[error(transparent)]
    Core(#[from] NormaError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Fail with [`DispatchError::Precondition`] unless `cond` holds.
pub(crate) fn ensure(cond: bool, arg: &'static str, reason: impl FnOnce() -> String) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(DispatchError::Precondition {
            arg,
            reason: reason(),
        })
    }
}
