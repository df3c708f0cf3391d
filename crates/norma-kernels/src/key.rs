//! Dispatch keys: precision combination plus padded hidden size.

use std::fmt;

use norma_core::DType;

use crate::error::Result;
use crate::types::TypeCombo;

/// Largest hidden size any registered kernel covers.
pub const MAX_HIDDEN_SIZE: usize = 8192;

/// Identifies one specialized kernel variant.
///
/// The registry is keyed by this struct; [`LauncherKey::to_bits`] gives the
/// packed 64-bit form (type key in the high 32 bits, hidden size in the low
/// 32 bits) for logging and interop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LauncherKey {
    pub types: TypeCombo,
    pub hidden_size: u32,
}

impl LauncherKey {
    /// Build a key, rejecting precisions the type encoder cannot represent.
    pub fn new(types: TypeCombo, hidden_size: u32) -> Result<Self> {
        types.type_key()?;
        Ok(Self { types, hidden_size })
    }

    pub fn to_bits(&self) -> Result<u64> {
        Ok((u64::from(self.types.type_key()?) << 32) | u64::from(self.hidden_size))
    }

    pub fn from_bits(bits: u64) -> Option<Self> {
        let types = TypeCombo::from_type_key((bits >> 32) as u32)?;
        Some(Self {
            types,
            hidden_size: bits as u32,
        })
    }
}

impl fmt::Display for LauncherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hidden={} {}", self.hidden_size, self.types)
    }
}

/// Packed 64-bit dispatch key. `hidden_size` must already be rounded to a
/// kernel bucket; no validation happens here.
pub fn get_key(
    wtype: DType,
    itype: DType,
    rtype: DType,
    otype: DType,
    ctype: DType,
    hidden_size: u32,
) -> Result<u64> {
    LauncherKey::new(TypeCombo::new(wtype, itype, rtype, otype, ctype), hidden_size)?.to_bits()
}

/// Bucket granularity for a hidden size: 256 up to 1536, 512 up to 3072,
/// 1024 beyond.
pub fn hidden_multiple(hidden_size: usize) -> usize {
    if hidden_size <= 1536 {
        256
    } else if hidden_size <= 3072 {
        512
    } else {
        1024
    }
}

/// Round a hidden size up to the bucket whose kernel serves it.
pub fn round_hidden_size(hidden_size: usize) -> usize {
    let m = hidden_multiple(hidden_size);
    (hidden_size + m - 1) / m * m
}
