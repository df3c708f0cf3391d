//! Launch parameters shared by the controller and every launcher.
//!
//! A launcher is called twice on the same [`LaunchParams`]: once with
//! [`LaunchPhase::Query`] to fill in grid size and scratch requirements, and
//! once with [`LaunchPhase::Execute`] after the controller has provided the
//! scratch.

use norma_core::{DType, Device, Tensor};

use crate::error::Result;
use crate::philox::PhiloxState;

/// Which half of the two-phase protocol a launcher call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPhase {
    /// Size the grid and report `elts_per_thread`, `barrier_size` and
    /// `workspace_bytes`. Reads no buffer contents.
    Query,
    /// Run the fused forward.
    Execute,
}

/// Opaque handle of the stream work is issued on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamId(pub u64);

/// Occupancy-relevant limits of the executing device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub name: String,
    pub multiprocessor_count: usize,
    pub max_threads_per_multiprocessor: usize,
    pub max_ctas_per_multiprocessor: usize,
    pub shared_memory_per_multiprocessor: usize,
}

impl DeviceProperties {
    /// How many CTAs of the given shape fit on one multiprocessor at once.
    pub fn ctas_per_multiprocessor(&self, threads_per_cta: usize, smem_bytes: usize) -> usize {
        let by_threads = self.max_threads_per_multiprocessor / threads_per_cta.max(1);
        let by_smem = if smem_bytes == 0 {
            usize::MAX
        } else {
            self.shared_memory_per_multiprocessor / smem_bytes
        };
        by_threads.min(by_smem).min(self.max_ctas_per_multiprocessor)
    }
}

/// Launcher entry point stored in the registry.
pub type FwdFunction = fn(&mut LaunchParams<'_>, LaunchPhase) -> Result<()>;

/// Buffers and scalars of one fused forward.
///
/// Inputs are borrowed from the caller, outputs and scratch from the
/// controller. Optional buffers are `None` when the feature is off.
#[derive(Debug)]
pub struct FwdParams<'a> {
    /// Logical rows (the subset length when subsetting).
    pub rows: usize,
    pub cols: usize,
    /// CTAs along the row dimension; set by Query.
    pub ctas_per_col: usize,

    pub x0: &'a Tensor,
    pub residual: Option<&'a Tensor>,
    pub gamma: &'a Tensor,
    pub beta: Option<&'a Tensor>,
    pub rowscale: Option<&'a Tensor>,
    pub colscale: Option<&'a Tensor>,
    pub x0_subset: Option<&'a Tensor>,
    pub z_subset: Option<&'a Tensor>,

    pub z: &'a mut Tensor,
    pub x: Option<&'a mut Tensor>,
    pub dmask: Option<&'a mut Tensor>,
    pub mu: &'a mut Tensor,
    pub rs: &'a mut Tensor,

    pub workspace: Option<&'a mut Tensor>,
    pub barrier: Option<&'a mut Tensor>,

    pub epsilon: f32,
    pub dropout_p: f32,
    pub dropout_keep_p: f32,
    pub dropout_scale: f32,
    pub rowscale_const: f32,
    pub inverse_cols: f32,
    pub is_rms_norm: bool,
    pub philox_args: Option<PhiloxState>,

    pub wtype: DType,
    pub itype: DType,
    pub rtype: DType,
    pub otype: DType,
    pub ctype: DType,
}

impl FwdParams<'_> {
    pub fn has_dropout(&self) -> bool {
        self.dropout_p > 0.0
    }

    pub fn has_subset(&self) -> bool {
        self.x0_subset.is_some()
    }
}

/// Per-call launch state. Created by the controller, dropped at the end of
/// the call.
#[derive(Debug)]
pub struct LaunchParams<'a> {
    pub device: Device,
    pub stream: StreamId,
    pub props: DeviceProperties,
    /// Random draws each thread consumes; set by Query.
    pub elts_per_thread: usize,
    /// i32 elements of cross-CTA barrier; set by Query.
    pub barrier_size: usize,
    /// Bytes of cross-CTA workspace; set by Query.
    pub workspace_bytes: usize,
    pub params: FwdParams<'a>,
}

impl<'a> LaunchParams<'a> {
    pub fn new(device: Device, stream: StreamId, props: DeviceProperties, params: FwdParams<'a>) -> Self {
        Self {
            device,
            stream,
            props,
            elts_per_thread: 0,
            barrier_size: 0,
            workspace_bytes: 0,
            params,
        }
    }
}
