//! Argument validation for the fused forward.
//!
//! [`build_plan`] checks every caller buffer against the contract and derives
//! the sizes and precisions the controller needs. Nothing is allocated here.

use norma_core::{DType, Tensor};

use crate::error::{ensure, DispatchError, Result};
use crate::forward::FwdArgs;
use crate::key::{round_hidden_size, MAX_HIDDEN_SIZE};
use crate::runtime::DeviceRuntime;
use crate::types::TypeCombo;

/// Everything derived from validated arguments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FwdPlan {
    /// Logical rows: the subset length when subsetting, else x0's rows.
    pub rows: usize,
    pub cols: usize,
    /// Hidden size rounded up to its kernel bucket.
    pub padded_hidden: usize,
    /// Rows of the output `z`.
    pub z_rows: usize,
    pub types: TypeCombo,
    /// Whether the pre-normalization sum is returned.
    pub save_x: bool,
    pub dropout_p: f32,
    pub dropout_keep_p: f32,
    pub dropout_scale: f32,
    pub inverse_cols: f32,
}

impl FwdPlan {
    /// Dropout is on for any positive probability, even one that rounds
    /// the keep probability to 1.
    pub fn has_dropout(&self) -> bool {
        self.dropout_p > 0.0
    }
}

fn ensure_resident(t: &Tensor, runtime: &dyn DeviceRuntime, arg: &'static str) -> Result<()> {
    let device = runtime.device();
    ensure(t.device() == device, arg, || {
        format!("must reside on {}, found on {}", device, t.device())
    })
}

fn ensure_contiguous(t: &Tensor, arg: &'static str) -> Result<()> {
    ensure(t.is_contiguous(), arg, || "must be contiguous".into())
}

fn ensure_dims(t: &Tensor, dims: &[usize], arg: &'static str) -> Result<()> {
    ensure(t.shape().dims() == dims, arg, || {
        format!("expected shape {:?}, got {}", dims, t.shape())
    })
}

fn ensure_dtype(t: &Tensor, dtype: DType, arg: &'static str) -> Result<()> {
    ensure(t.dtype() == dtype, arg, || {
        format!("expected dtype {}, got {}", dtype, t.dtype())
    })
}

/// A resident, contiguous tensor of exactly `dims` and `dtype`.
fn ensure_aux(
    t: &Tensor,
    runtime: &dyn DeviceRuntime,
    dims: &[usize],
    dtype: DType,
    arg: &'static str,
) -> Result<()> {
    ensure_resident(t, runtime, arg)?;
    ensure_contiguous(t, arg)?;
    ensure_dims(t, dims, arg)?;
    ensure_dtype(t, dtype, arg)
}

/// Validate `args` and derive the launch plan.
pub fn build_plan(runtime: &dyn DeviceRuntime, args: &FwdArgs<'_>) -> Result<FwdPlan> {
    let x0 = args.x0;
    ensure_resident(x0, runtime, "x0")?;
    ensure_contiguous(x0, "x0")?;
    let (x0_rows, cols) = x0.shape().as_matrix().ok_or_else(|| DispatchError::Precondition {
        arg: "x0",
        reason: format!("must be 2-D, got shape {}", x0.shape()),
    })?;
    let rows = match args.x0_subset {
        Some(subset) => subset.shape().dim(0).unwrap_or(0),
        None => x0_rows,
    };

    let itype = x0.dtype();
    let wtype = args.gamma.dtype();
    let rtype = match args.residual {
        Some(residual) => residual.dtype(),
        None if args.residual_in_fp32 => DType::F32,
        None => itype,
    };
    let types = TypeCombo::new(wtype, itype, rtype, itype, DType::F32);

    ensure_resident(args.gamma, runtime, "gamma")?;
    ensure_contiguous(args.gamma, "gamma")?;
    ensure(args.gamma.numel() == cols, "gamma", || {
        format!("has {} elements, x0 has {} columns", args.gamma.numel(), cols)
    })?;

    if let Some(beta) = args.beta {
        ensure_dtype(beta, wtype, "beta")?;
        ensure_resident(beta, runtime, "beta")?;
        ensure_contiguous(beta, "beta")?;
        ensure_dims(beta, args.gamma.shape().dims(), "beta")?;
    }

    if let Some(residual) = args.residual {
        ensure_resident(residual, runtime, "residual")?;
        ensure_contiguous(residual, "residual")?;
        ensure_dims(residual, &[rows, cols], "residual")?;
        ensure(!args.residual_in_fp32 || rtype == DType::F32, "residual", || {
            format!("residual_in_fp32 is set but residual is {}", rtype)
        })?;
    }

    if let Some(rowscale) = args.rowscale {
        ensure_aux(rowscale, runtime, &[rows], itype, "rowscale")?;
    }

    if let Some(colscale) = args.colscale {
        ensure_aux(colscale, runtime, &[cols], wtype, "colscale")?;
    }

    match (args.x0_subset, args.z_subset) {
        (None, None) => {}
        (Some(x0_subset), Some(z_subset)) => {
            ensure_aux(x0_subset, runtime, &[rows], DType::I32, "x0_subset")?;
            ensure_aux(z_subset, runtime, &[rows], DType::I32, "z_subset")?;
        }
        (Some(_), None) => {
            return Err(DispatchError::Precondition {
                arg: "z_subset",
                reason: "required when x0_subset is given".into(),
            });
        }
        (None, Some(_)) => {
            return Err(DispatchError::Precondition {
                arg: "x0_subset",
                reason: "required when z_subset is given".into(),
            });
        }
    }

    ensure(cols <= MAX_HIDDEN_SIZE, "hidden_size", || {
        format!("{} exceeds the largest supported hidden size {}", cols, MAX_HIDDEN_SIZE)
    })?;
    ensure(cols > 0 && cols % 8 == 0, "hidden_size", || {
        format!("{} must be a positive multiple of 8", cols)
    })?;
    ensure(args.epsilon >= 0.0, "epsilon", || {
        format!("must be non-negative, got {}", args.epsilon)
    })?;
    ensure(
        (0.0..1.0).contains(&args.dropout_p),
        "dropout_p",
        || format!("must be in [0, 1), got {}", args.dropout_p),
    )?;

    let subset = args.x0_subset.is_some();
    let has_dropout = args.dropout_p > 0.0;
    let save_x = args.residual.is_some()
        || has_dropout
        || args.rowscale.is_some()
        || args.colscale.is_some()
        || subset
        || itype != rtype;

    Ok(FwdPlan {
        rows,
        cols,
        padded_hidden: round_hidden_size(cols),
        z_rows: if subset { args.z_numrows } else { rows },
        types,
        save_x,
        dropout_p: args.dropout_p,
        dropout_keep_p: 1.0 - args.dropout_p,
        dropout_scale: 1.0 / (1.0 - args.dropout_p),
        inverse_cols: 1.0 / cols as f32,
    })
}
