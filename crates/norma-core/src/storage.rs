use std::sync::Arc;

use crate::{DType, Device, Element};

/// Shared, reference-counted tensor storage.
///
/// Storage is a flat byte buffer tagged with its dtype and device. Clones
/// share the buffer (views from transpose); writes go through
/// `as_bytes_mut`, which copies on write when the buffer is shared.
#[derive(Debug, Clone)]
pub struct Storage {
    data: Arc<Vec<u8>>,
    dtype: DType,
    device: Device,
}

impl Storage {
    /// Allocate zeroed host storage for `numel` elements of the given dtype.
    pub fn zeros(dtype: DType, numel: usize) -> Self {
        Self {
            data: Arc::new(vec![0u8; dtype.storage_bytes(numel)]),
            dtype,
            device: Device::Cpu,
        }
    }

    /// Create storage from a typed slice.
    pub fn from_slice<T: Element>(data: &[T]) -> Self {
        Self {
            data: Arc::new(bytemuck::cast_slice::<T, u8>(data).to_vec()),
            dtype: T::DTYPE,
            device: Device::Cpu,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Retag the device this storage belongs to. The bytes stay in host
    /// memory; runtimes that stage buffers through the host compare the tag
    /// in their residency checks.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Size in bytes.
    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    /// Read-only view of the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable view of the raw bytes.
    /// Clones the underlying buffer if other references exist (copy-on-write).
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        Arc::<Vec<u8>>::make_mut(&mut self.data).as_mut_slice()
    }
}
