use std::fmt;

use half::{bf16, f16};
use smallvec::SmallVec;

use crate::device::Device;
use crate::dtype::{DType, Element};
use crate::error::NormaError;
use crate::shape::Shape;
use crate::storage::Storage;
use crate::Result;

/// A multi-dimensional array backed by shared byte storage.
///
/// Tensors carry explicit strides and an offset so that views (transpose)
/// share storage with their source; kernels that need dense rows check
/// [`Tensor::is_contiguous`] before touching the bytes.
///
/// # Examples
///
/// ```
/// use norma_core::{DType, Tensor};
///
/// let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
/// assert_eq!(t.shape().dims(), &[2, 2]);
/// assert_eq!(t.numel(), 4);
///
/// let h = t.to_dtype(DType::F16).unwrap();
/// assert_eq!(h.dtype(), DType::F16);
/// assert_eq!(h.to_f32_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
/// ```
#[derive(Clone)]
pub struct Tensor {
    storage: Storage,
    shape: Shape,
    strides: SmallVec<[usize; 4]>,
    offset: usize,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    pub fn from_f32(data: &[f32], shape: &[usize]) -> Self {
        Self::from_slice(data, shape)
    }

    pub fn from_i32(data: &[i32], shape: &[usize]) -> Self {
        Self::from_slice(data, shape)
    }

    /// Copy `data` into a new row-major tensor.
    ///
    /// # Panics
    /// Panics if `shape` does not describe `data.len()` elements.
    pub fn from_slice<T: Element>(data: &[T], shape: &[usize]) -> Self {
        let s = Shape::new(shape);
        assert_eq!(
            s.numel(),
            data.len(),
            "Shape {:?} requires {} elements, got {}",
            shape,
            s.numel(),
            data.len()
        );
        Self::from_storage(Storage::from_slice(data), shape)
    }

    /// Zero-filled tensor of any dtype.
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let numel = Shape::new(shape).numel();
        Self::from_storage(Storage::zeros(dtype, numel), shape)
    }

    pub fn ones(shape: &[usize]) -> Self {
        let numel = Shape::new(shape).numel();
        Self::from_f32(&vec![1.0; numel], shape)
    }

    /// f32 samples from N(0, 1).
    pub fn randn(shape: &[usize]) -> Self {
        use rand::Rng;
        let numel = Shape::new(shape).numel();
        let mut rng = rand::thread_rng();
        // Box-Muller
        let data: Vec<f32> = (0..numel)
            .map(|_| {
                let u1: f32 = rng.gen_range(1e-7f32..1.0f32);
                let u2: f32 = rng.gen_range(0.0f32..std::f32::consts::TAU);
                (-2.0 * u1.ln()).sqrt() * u2.cos()
            })
            .collect();
        Self::from_f32(&data, shape)
    }

    /// Wrap `storage` as a packed tensor of `shape`.
    pub fn from_storage(storage: Storage, shape: &[usize]) -> Self {
        let s = Shape::new(shape);
        let strides = s.contiguous_strides();
        Self {
            storage,
            shape: s,
            strides,
            offset: 0,
        }
    }

    pub fn storage_ref(&self) -> &Storage {
        &self.storage
    }

    // =========================================================================
    // Properties
    // =========================================================================

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn device(&self) -> Device {
        self.storage.device()
    }

    /// Same tensor with its storage tagged as living on `device`.
    pub fn with_device(self, device: Device) -> Self {
        Self {
            storage: self.storage.with_device(device),
            ..self
        }
    }

    /// Whether this tensor is contiguous in memory (row-major).
    pub fn is_contiguous(&self) -> bool {
        self.strides == self.shape.contiguous_strides() && self.offset == 0
    }

    // =========================================================================
    // Data access
    // =========================================================================

    /// Raw bytes of a contiguous tensor.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        self.require_contiguous()?;
        Ok(self.storage.as_bytes())
    }

    /// Mutable raw bytes of a contiguous tensor (copy-on-write).
    pub fn as_bytes_mut(&mut self) -> Result<&mut [u8]> {
        self.require_contiguous()?;
        Ok(self.storage.as_bytes_mut())
    }

    /// Copy the elements out in logical (row-major) order as `T`.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype() {
            return Err(NormaError::DTypeMismatch {
                expected: self.dtype(),
                got: T::DTYPE,
            });
        }
        let bytes = self.storage.as_bytes();
        Ok((0..self.numel())
            .map(|i| T::load(bytes, self.flat_to_physical(i)))
            .collect())
    }

    /// Copy the elements out in logical order, converting each to f32.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        let bytes = self.storage.as_bytes();
        let dtype = self.dtype();
        (0..self.numel())
            .map(|i| read_as_f32(bytes, dtype, self.flat_to_physical(i)))
            .collect()
    }

    /// Convert to another dtype, producing a fresh contiguous tensor.
    pub fn to_dtype(&self, dtype: DType) -> Result<Tensor> {
        if dtype == self.dtype() && self.is_contiguous() {
            return Ok(self.clone());
        }
        let values = self.to_f32_vec()?;
        let mut storage = Storage::zeros(dtype, values.len());
        let bytes = storage.as_bytes_mut();
        for (i, v) in values.into_iter().enumerate() {
            write_from_f32(bytes, dtype, i, v)?;
        }
        Ok(Tensor::from_storage(storage, self.shape.dims()))
    }

    /// Convert logical flat index to physical storage index.
    fn flat_to_physical(&self, flat_index: usize) -> usize {
        let mut remaining = flat_index;
        let mut physical = self.offset;
        for (i, cs) in self.shape.contiguous_strides().iter().enumerate() {
            physical += (remaining / cs) * self.strides[i];
            remaining %= cs;
        }
        physical
    }

    fn require_contiguous(&self) -> Result<()> {
        if !self.is_contiguous() {
            return Err(NormaError::StorageError(
                "raw byte access requires a contiguous tensor".into(),
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Shape operations (zero-copy views)
    // =========================================================================

    /// Transpose the last two dimensions (zero-copy view).
    pub fn transpose(&self) -> Result<Tensor> {
        let new_shape = self.shape.transpose().ok_or(NormaError::InvalidAxis {
            axis: 0,
            ndim: self.ndim(),
        })?;

        let ndim = self.ndim();
        let mut new_strides = self.strides.clone();
        new_strides.swap(ndim - 2, ndim - 1);

        Ok(Tensor {
            storage: self.storage.clone(),
            shape: new_shape,
            strides: new_strides,
            offset: self.offset,
        })
    }
}

fn read_as_f32(bytes: &[u8], dtype: DType, idx: usize) -> Result<f32> {
    Ok(match dtype {
        DType::F32 => f32::load(bytes, idx),
        DType::F16 => Element::to_f32(f16::load(bytes, idx)),
        DType::BF16 => Element::to_f32(bf16::load(bytes, idx)),
        DType::F64 => f64::load(bytes, idx) as f32,
        DType::I32 => i32::load(bytes, idx) as f32,
        DType::U8 => u8::load(bytes, idx) as f32,
        other => return Err(NormaError::UnsupportedDType(other)),
    })
}

fn write_from_f32(bytes: &mut [u8], dtype: DType, idx: usize, v: f32) -> Result<()> {
    match dtype {
        DType::F32 => v.store(bytes, idx),
        DType::F16 => <f16 as Element>::from_f32(v).store(bytes, idx),
        DType::BF16 => <bf16 as Element>::from_f32(v).store(bytes, idx),
        DType::F64 => (v as f64).store(bytes, idx),
        DType::I32 => (v as i32).store(bytes, idx),
        DType::U8 => (v as u8).store(bytes, idx),
        other => return Err(NormaError::UnsupportedDType(other)),
    }
    Ok(())
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={}, device={}, contiguous={})",
            self.shape,
            self.dtype(),
            self.device(),
            self.is_contiguous(),
        )
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_f32_vec() {
            Ok(data) if data.len() <= 20 => write!(f, "tensor({:?}, shape={})", data, self.shape),
            Ok(data) if !data.is_empty() => write!(
                f,
                "tensor([{:.4}, {:.4}, ..., {:.4}], shape={})",
                data[0],
                data[1],
                data[data.len() - 1],
                self.shape
            ),
            _ => write!(f, "tensor(shape={}, dtype={})", self.shape, self.dtype()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f32() {
        let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        assert_eq!(t.shape().dims(), &[2, 3]);
        assert_eq!(t.ndim(), 2);
        assert_eq!(t.numel(), 6);
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.device(), Device::Cpu);
        assert!(t.is_contiguous());
    }

    #[test]
    #[should_panic(expected = "requires 6 elements")]
    fn test_from_f32_shape_mismatch() {
        Tensor::from_f32(&[1.0, 2.0], &[2, 3]);
    }

    #[test]
    fn test_zeros_and_ones() {
        let z = Tensor::zeros(&[3, 4], DType::BF16);
        assert_eq!(z.storage_ref().nbytes(), 24);
        assert!(z.to_f32_vec().unwrap().iter().all(|&v| v == 0.0));
        assert_eq!(Tensor::ones(&[2]).to_vec::<f32>().unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_from_i32() {
        let t = Tensor::from_i32(&[3, -1], &[2]);
        assert_eq!(t.dtype(), DType::I32);
        assert_eq!(t.to_vec::<i32>().unwrap(), vec![3, -1]);
        assert!(t.to_vec::<f32>().is_err());
    }

    #[test]
    fn test_to_dtype_roundtrip_exact_values() {
        let t = Tensor::from_f32(&[0.5, -2.0, 8.0], &[3]);
        for dt in [DType::F16, DType::BF16, DType::F32] {
            let c = t.to_dtype(dt).unwrap();
            assert_eq!(c.dtype(), dt);
            assert_eq!(c.to_f32_vec().unwrap(), vec![0.5, -2.0, 8.0]);
        }
    }

    #[test]
    fn test_transpose_is_view() {
        let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let tr = t.transpose().unwrap();
        assert_eq!(tr.shape().dims(), &[3, 2]);
        assert!(!tr.is_contiguous());
        assert!(tr.as_bytes().is_err());
        assert_eq!(tr.to_f32_vec().unwrap(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_to_dtype_packs_views() {
        let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let c = t.transpose().unwrap().to_dtype(DType::F32).unwrap();
        assert!(c.is_contiguous());
        assert_eq!(c.shape().dims(), &[3, 2]);
        assert_eq!(c.to_vec::<f32>().unwrap(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_with_device() {
        let t = Tensor::from_f32(&[1.0, 2.0], &[2]).with_device(Device::Cuda(0));
        assert_eq!(t.device(), Device::Cuda(0));
        assert_eq!(t.to_f32_vec().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_bytes_mut_copy_on_write() {
        let a = Tensor::from_f32(&[1.0, 2.0], &[2]);
        let mut b = a.clone();
        7.0f32.store(b.as_bytes_mut().unwrap(), 1);
        assert_eq!(a.to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
        assert_eq!(b.to_vec::<f32>().unwrap(), vec![1.0, 7.0]);
    }

    #[test]
    fn test_debug_display() {
        let t = Tensor::from_f32(&[1.0, 2.0], &[2]);
        let debug = format!("{:?}", t);
        assert!(debug.contains("Tensor"));
        assert!(debug.contains("f32"));
        assert!(format!("{}", t).contains("tensor"));
    }
}
