//! Precision encoding for dispatch keys.
//!
//! The fused kernels are specialized over five precision roles: weight,
//! input, residual, output and compute. Each role is one of f16, bf16 or f32
//! and packs into a 2-bit code.

use std::fmt;

use norma_core::DType;

use crate::error::{DispatchError, Result};

/// 2-bit code for a supported precision; anything else is rejected.
pub fn type_id(dtype: DType) -> Result<u32> {
    match dtype {
        DType::F16 => Ok(0),
        DType::BF16 => Ok(1),
        DType::F32 => Ok(2),
        other => Err(DispatchError::UnsupportedType(other)),
    }
}

/// Inverse of [`type_id`].
pub fn dtype_from_id(id: u32) -> Option<DType> {
    match id {
        0 => Some(DType::F16),
        1 => Some(DType::BF16),
        2 => Some(DType::F32),
        _ => None,
    }
}

/// The five precisions a fused forward runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeCombo {
    pub weight: DType,
    pub input: DType,
    pub residual: DType,
    pub output: DType,
    pub compute: DType,
}

impl TypeCombo {
    pub fn new(weight: DType, input: DType, residual: DType, output: DType, compute: DType) -> Self {
        Self {
            weight,
            input,
            residual,
            output,
            compute,
        }
    }

    /// Pack the role codes: weight in bits 0-1, input 2-3, residual 4-5,
    /// output 6-7, compute 8-9.
    pub fn type_key(&self) -> Result<u32> {
        Ok(type_id(self.weight)?
            | (type_id(self.input)? << 2)
            | (type_id(self.residual)? << 4)
            | (type_id(self.output)? << 6)
            | (type_id(self.compute)? << 8))
    }

    /// Decode a packed type key. Returns `None` for codes outside the
    /// supported set or stray high bits.
    pub fn from_type_key(key: u32) -> Option<Self> {
        if key >> 10 != 0 {
            return None;
        }
        let role = |shift: u32| dtype_from_id((key >> shift) & 0b11);
        Some(Self {
            weight: role(0)?,
            input: role(2)?,
            residual: role(4)?,
            output: role(6)?,
            compute: role(8)?,
        })
    }
}

impl fmt::Display for TypeCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "w={} i={} r={} o={} c={}",
            self.weight, self.input, self.residual, self.output, self.compute
        )
    }
}
