use std::fmt;

use half::{bf16, f16};

/// Data types understood by norma tensors.
///
/// The fused kernels accept the three float precisions; the integer types
/// carry dropout masks (`U8`), subset indices (`I32`), barriers (`I32`) and
/// raw scratch bytes (`I8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 16-bit IEEE 754 half-precision float
    F16,
    /// 16-bit Brain Float (same exponent range as F32, reduced mantissa)
    BF16,
    /// 32-bit IEEE 754 single-precision float
    F32,
    /// 64-bit IEEE 754 double-precision float
    F64,
    /// 8-bit signed integer
    I8,
    /// 8-bit unsigned integer
    U8,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn element_size(&self) -> usize {
        match self {
            DType::F16 | DType::BF16 => 2,
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
            DType::I8 | DType::U8 => 1,
        }
    }

    /// Number of bytes needed to store `n` elements of this dtype.
    pub fn storage_bytes(&self, n: usize) -> usize {
        self.element_size() * n
    }

    /// Parse the short names used by `Display` (`"f16"`, `"bf16"`, ...).
    pub fn from_name(name: &str) -> Option<DType> {
        match name.to_ascii_lowercase().as_str() {
            "f16" | "fp16" | "half" => Some(DType::F16),
            "bf16" => Some(DType::BF16),
            "f32" | "fp32" | "float" => Some(DType::F32),
            "f64" | "fp64" => Some(DType::F64),
            "i8" => Some(DType::I8),
            "u8" => Some(DType::U8),
            "i32" => Some(DType::I32),
            "i64" => Some(DType::I64),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F16 => write!(f, "f16"),
            DType::BF16 => write!(f, "bf16"),
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
            DType::I8 => write!(f, "i8"),
            DType::U8 => write!(f, "u8"),
            DType::I32 => write!(f, "i32"),
            DType::I64 => write!(f, "i64"),
        }
    }
}

/// A scalar type that can live in tensor byte storage.
///
/// Element reads and writes go through unaligned pod copies, so storage
/// buffers never need to be aligned to `size_of::<Self>()`.
pub trait Element: bytemuck::Pod + Send + Sync + 'static {
    const DTYPE: DType;

    fn to_f32(self) -> f32;

    fn from_f32(v: f32) -> Self;

    /// Read element `idx` from a byte buffer holding `Self` values.
    #[inline]
    fn load(bytes: &[u8], idx: usize) -> Self {
        let size = std::mem::size_of::<Self>();
        bytemuck::pod_read_unaligned(&bytes[idx * size..(idx + 1) * size])
    }

    /// Write `self` to element `idx` of a byte buffer holding `Self` values.
    #[inline]
    fn store(self, bytes: &mut [u8], idx: usize) {
        let size = std::mem::size_of::<Self>();
        bytes[idx * size..(idx + 1) * size].copy_from_slice(bytemuck::bytes_of(&self));
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }
}

impl Element for bf16 {
    const DTYPE: DType = DType::BF16;

    #[inline]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        bf16::from_f32(v)
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v as f64
    }
}

impl Element for i32 {
    const DTYPE: DType = DType::I32;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v as i32
    }
}

impl Element for u8 {
    const DTYPE: DType = DType::U8;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v as u8
    }
}
