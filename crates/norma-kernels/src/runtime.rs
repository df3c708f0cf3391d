//! Device runtime: allocation, stream and device properties.

use std::path::Path;

use serde::{Deserialize, Serialize};

use norma_core::{DType, Device, NormaError, Shape, Tensor};

use crate::launch::{DeviceProperties, StreamId};

/// What the dispatch layer needs from the tensor runtime.
pub trait DeviceRuntime: Send + Sync {
    /// Device every input must live on and every output is allocated on.
    fn device(&self) -> Device;

    /// Stream launches are issued on.
    fn stream(&self) -> StreamId;

    fn properties(&self) -> DeviceProperties;

    /// Allocate a zero-filled tensor.
    fn zeros(&self, shape: &[usize], dtype: DType) -> norma_core::Result<Tensor>;

    /// Allocate a tensor whose contents the caller will overwrite.
    fn empty(&self, shape: &[usize], dtype: DType) -> norma_core::Result<Tensor> {
        self.zeros(shape, dtype)
    }
}

/// Shape of the virtual device the host runtime reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRuntimeConfig {
    /// Name reported in device properties.
    pub name: String,

    pub multiprocessor_count: usize,

    pub max_threads_per_multiprocessor: usize,

    pub max_ctas_per_multiprocessor: usize,

    /// Shared memory available to resident CTAs of one multiprocessor.
    pub shared_memory_per_multiprocessor: usize,

    /// Largest single allocation; `None` means unbounded.
    pub memory_limit_bytes: Option<usize>,
}

impl Default for HostRuntimeConfig {
    fn default() -> Self {
        Self {
            name: "host".into(),
            multiprocessor_count: 8,
            max_threads_per_multiprocessor: 2048,
            max_ctas_per_multiprocessor: 16,
            shared_memory_per_multiprocessor: 96 * 1024,
            memory_limit_bytes: None,
        }
    }
}

impl HostRuntimeConfig {
    /// Try to load a config from a JSON file. Missing keys take their
    /// default values.
    ///
    /// Returns `None` if the file doesn't exist or can't be parsed.
    pub fn from_json_file(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        let json: serde_json::Value = serde_json::from_str(&text).ok()?;
        let defaults = Self::default();

        let usize_or = |key: &str, default: usize| -> Option<usize> {
            match json.get(key) {
                None => Some(default),
                Some(v) => v.as_u64().map(|n| n as usize),
            }
        };

        let name = match json.get("name") {
            None => defaults.name,
            Some(v) => v.as_str()?.to_string(),
        };
        let memory_limit_bytes = match json.get("memory_limit_bytes") {
            None | Some(serde_json::Value::Null) => None,
            Some(v) => Some(v.as_u64()? as usize),
        };

        Some(Self {
            name,
            multiprocessor_count: usize_or("multiprocessor_count", defaults.multiprocessor_count)?,
            max_threads_per_multiprocessor: usize_or(
                "max_threads_per_multiprocessor",
                defaults.max_threads_per_multiprocessor,
            )?,
            max_ctas_per_multiprocessor: usize_or(
                "max_ctas_per_multiprocessor",
                defaults.max_ctas_per_multiprocessor,
            )?,
            shared_memory_per_multiprocessor: usize_or(
                "shared_memory_per_multiprocessor",
                defaults.shared_memory_per_multiprocessor,
            )?,
            memory_limit_bytes,
        })
    }

    pub fn properties(&self) -> DeviceProperties {
        DeviceProperties {
            name: self.name.clone(),
            multiprocessor_count: self.multiprocessor_count,
            max_threads_per_multiprocessor: self.max_threads_per_multiprocessor,
            max_ctas_per_multiprocessor: self.max_ctas_per_multiprocessor,
            shared_memory_per_multiprocessor: self.shared_memory_per_multiprocessor,
        }
    }
}

/// Runtime backed by host memory. Launches run inline on the calling thread.
#[derive(Debug, Clone, Default)]
pub struct HostRuntime {
    config: HostRuntimeConfig,
}

impl HostRuntime {
    pub fn new(config: HostRuntimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HostRuntimeConfig {
        &self.config
    }
}

impl DeviceRuntime for HostRuntime {
    fn device(&self) -> Device {
        Device::Cpu
    }

    fn stream(&self) -> StreamId {
        StreamId::default()
    }

    fn properties(&self) -> DeviceProperties {
        self.config.properties()
    }

    fn zeros(&self, shape: &[usize], dtype: DType) -> norma_core::Result<Tensor> {
        let bytes = dtype.storage_bytes(Shape::new(shape).numel());
        if let Some(limit) = self.config.memory_limit_bytes {
            if bytes > limit {
                return Err(NormaError::StorageError(format!(
                    "allocation of {} bytes for {:?} {} exceeds limit of {} bytes",
                    bytes, shape, dtype, limit
                )));
            }
        }
        Ok(Tensor::zeros(shape, dtype))
    }
}
