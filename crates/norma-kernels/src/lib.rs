//! # norma-kernels
//!
//! Dispatch layer for the fused dropout + residual + layer-norm forward.
//!
//! Provides:
//! - Type encoding and 64-bit dispatch keys over (weight, input, residual,
//!   output, compute) precisions and padded hidden size
//! - A process-wide kernel registry with exact-match launcher resolution
//! - Argument validation that turns caller tensors into a launch plan
//! - The two-phase Query/Execute launch protocol with cross-CTA scratch
//! - Philox counter bookkeeping for reproducible dropout masks
//! - A host runtime and reference kernel implementing every registered variant

pub mod error;
pub mod types;
pub mod key;
pub mod traits;
pub mod launch;
pub mod philox;
pub mod runtime;
pub mod host;
mod kernels;
pub mod registry;
pub mod validate;
pub mod forward;

pub use error::{DispatchError, Result};
pub use types::{type_id, TypeCombo};
pub use key::{get_key, round_hidden_size, LauncherKey, MAX_HIDDEN_SIZE};
pub use traits::KernelTraits;
pub use launch::{DeviceProperties, FwdFunction, FwdParams, LaunchParams, LaunchPhase, StreamId};
pub use philox::{default_generator, Generator, PhiloxState};
pub use runtime::{DeviceRuntime, HostRuntime, HostRuntimeConfig};
pub use registry::{fwd_registry, get_fwd_launcher, FwdEntry, FwdRegistry};
pub use validate::{build_plan, FwdPlan};
pub use forward::{dropout_add_ln_fwd, FwdArgs, FwdOutputs};
