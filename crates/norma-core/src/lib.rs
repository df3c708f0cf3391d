//! # norma-core
//!
//! Host tensor runtime underneath the norma fused-norm dispatch layer.
//!
//! Provides:
//! - `DType` with the float precisions the fused kernels accept (F16, BF16, F32)
//!   plus the integer types used for masks, indices and scratch
//! - `Element`, the typed bridge between byte storage and f32 compute
//! - `Device` identity, `Shape`, reference-counted `Storage`
//! - `Tensor` with strided views so contiguity contracts can be checked

pub mod dtype;
pub mod device;
pub mod storage;
pub mod shape;
pub mod tensor;
pub mod error;

pub use dtype::{DType, Element};
pub use device::Device;
pub use storage::Storage;
pub use shape::Shape;
pub use tensor::Tensor;
pub use error::NormaError;

pub type Result<T> = std::result::Result<T, NormaError>;
