//! Fused dropout + residual + layer-norm forward: the public entry point.
//!
//! [`dropout_add_ln_fwd`] validates the arguments, resolves the launcher for
//! the call's precisions and padded hidden size, allocates the outputs, and
//! drives the launcher through Query and Execute. Between the two phases it
//! reserves the dropout stream window and allocates any cross-CTA scratch
//! the Query reported.

use norma_core::{DType, Tensor};

use crate::error::Result;
use crate::launch::{FwdParams, LaunchParams, LaunchPhase};
use crate::philox::{default_generator, Generator};
use crate::registry::get_fwd_launcher;
use crate::runtime::DeviceRuntime;
use crate::validate::build_plan;

/// Inputs of one fused forward.
///
/// # Examples
///
/// ```
/// use norma_core::Tensor;
/// use norma_kernels::{dropout_add_ln_fwd, FwdArgs, HostRuntime};
///
/// let x0 = Tensor::randn(&[4, 256]);
/// let gamma = Tensor::ones(&[256]);
/// let out = dropout_add_ln_fwd(&HostRuntime::default(), FwdArgs::new(&x0, &gamma)).unwrap();
/// assert_eq!(out.z.shape().dims(), &[4, 256]);
/// assert!(out.x.is_none());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FwdArgs<'a> {
    pub x0: &'a Tensor,
    pub residual: Option<&'a Tensor>,
    pub gamma: &'a Tensor,
    pub beta: Option<&'a Tensor>,
    pub rowscale: Option<&'a Tensor>,
    pub colscale: Option<&'a Tensor>,
    /// 1-based x0 row per logical row; 0 contributes no x0.
    pub x0_subset: Option<&'a Tensor>,
    /// 1-based z row per logical row; 0 writes nothing.
    pub z_subset: Option<&'a Tensor>,
    pub dropout_p: f32,
    pub epsilon: f32,
    /// Row scale applied in place of `rowscale` when subsetting.
    pub rowscale_const: f32,
    /// Rows of `z` when subsetting.
    pub z_numrows: usize,
    /// Dropout stream; the process-wide default when `None`.
    pub generator: Option<&'a Generator>,
    pub residual_in_fp32: bool,
    pub is_rms_norm: bool,
}

impl<'a> FwdArgs<'a> {
    pub fn new(x0: &'a Tensor, gamma: &'a Tensor) -> Self {
        Self {
            x0,
            residual: None,
            gamma,
            beta: None,
            rowscale: None,
            colscale: None,
            x0_subset: None,
            z_subset: None,
            dropout_p: 0.0,
            epsilon: 1e-5,
            rowscale_const: 1.0,
            z_numrows: 0,
            generator: None,
            residual_in_fp32: false,
            is_rms_norm: false,
        }
    }

    pub fn residual(mut self, residual: &'a Tensor) -> Self {
        self.residual = Some(residual);
        self
    }

    pub fn beta(mut self, beta: &'a Tensor) -> Self {
        self.beta = Some(beta);
        self
    }

    pub fn rowscale(mut self, rowscale: &'a Tensor) -> Self {
        self.rowscale = Some(rowscale);
        self
    }

    pub fn colscale(mut self, colscale: &'a Tensor) -> Self {
        self.colscale = Some(colscale);
        self
    }

    /// Gather x0 rows through `x0_subset` and scatter into a `z` of
    /// `z_numrows` rows through `z_subset`.
    pub fn subset(mut self, x0_subset: &'a Tensor, z_subset: &'a Tensor, z_numrows: usize) -> Self {
        self.x0_subset = Some(x0_subset);
        self.z_subset = Some(z_subset);
        self.z_numrows = z_numrows;
        self
    }

    pub fn rowscale_const(mut self, rowscale_const: f32) -> Self {
        self.rowscale_const = rowscale_const;
        self
    }

    pub fn dropout(mut self, p: f32) -> Self {
        self.dropout_p = p;
        self
    }

    pub fn epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn generator(mut self, generator: &'a Generator) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn residual_in_fp32(mut self, on: bool) -> Self {
        self.residual_in_fp32 = on;
        self
    }

    pub fn rms_norm(mut self, on: bool) -> Self {
        self.is_rms_norm = on;
        self
    }
}

/// Results of one fused forward.
#[derive(Debug)]
pub struct FwdOutputs {
    /// Normalized output, `[rows, cols]` or `[z_numrows, cols]` when
    /// subsetting, at input precision.
    pub z: Tensor,
    /// Pre-normalization sum at residual precision, when it differs from x0.
    pub x: Option<Tensor>,
    /// Keep mask (1 = kept), when dropout is active.
    pub dmask: Option<Tensor>,
    /// Row means, f32.
    pub mu: Tensor,
    /// Row inverse standard deviations, f32.
    pub rsigma: Tensor,
}

/// Run the fused dropout + residual + layer-norm (or RMS-norm) forward.
pub fn dropout_add_ln_fwd(runtime: &dyn DeviceRuntime, args: FwdArgs<'_>) -> Result<FwdOutputs> {
    let plan = build_plan(runtime, &args)?;
    let launcher = get_fwd_launcher(plan.types, plan.padded_hidden as u32)?;
    tracing::debug!(
        rows = plan.rows,
        cols = plan.cols,
        hidden = plan.padded_hidden,
        types = %plan.types,
        save_x = plan.save_x,
        dropout_p = args.dropout_p,
        rms = args.is_rms_norm,
        "dropout_add_ln_fwd"
    );

    let (rows, cols) = (plan.rows, plan.cols);
    let mut z = runtime.empty(&[plan.z_rows, cols], plan.types.output)?;
    let mut x = if plan.save_x {
        Some(runtime.empty(&[rows, cols], plan.types.residual)?)
    } else {
        None
    };
    let mut dmask = if plan.has_dropout() {
        Some(runtime.empty(&[rows, cols], DType::U8)?)
    } else {
        None
    };
    let mut mu = runtime.empty(&[rows], DType::F32)?;
    let mut rsigma = runtime.empty(&[rows], DType::F32)?;

    // Cross-CTA scratch, sized by Query and assigned only when needed.
    let mut workspace: Tensor;
    let mut barrier: Tensor;

    let params = FwdParams {
        rows,
        cols,
        ctas_per_col: 0,
        x0: args.x0,
        residual: args.residual,
        gamma: args.gamma,
        beta: args.beta,
        rowscale: args.rowscale,
        colscale: args.colscale,
        x0_subset: args.x0_subset,
        z_subset: args.z_subset,
        z: &mut z,
        x: x.as_mut(),
        dmask: dmask.as_mut(),
        mu: &mut mu,
        rs: &mut rsigma,
        workspace: None,
        barrier: None,
        epsilon: args.epsilon,
        dropout_p: plan.dropout_p,
        dropout_keep_p: plan.dropout_keep_p,
        dropout_scale: plan.dropout_scale,
        rowscale_const: args.rowscale_const,
        inverse_cols: plan.inverse_cols,
        is_rms_norm: args.is_rms_norm,
        philox_args: None,
        wtype: plan.types.weight,
        itype: plan.types.input,
        rtype: plan.types.residual,
        otype: plan.types.output,
        ctype: plan.types.compute,
    };
    let mut launch = LaunchParams::new(runtime.device(), runtime.stream(), runtime.properties(), params);

    tracing::trace!("fwd phase: query");
    launcher(&mut launch, LaunchPhase::Query)?;

    if plan.has_dropout() {
        let generator = match args.generator {
            Some(g) => g,
            None => default_generator(),
        };
        launch.params.philox_args = Some(generator.philox_state(launch.elts_per_thread as u64));
    }

    if launch.barrier_size > 0 {
        barrier = runtime.zeros(&[launch.barrier_size], DType::I32)?;
        workspace = runtime.empty(&[launch.workspace_bytes], DType::I8)?;
        launch.params.barrier = Some(&mut barrier);
        launch.params.workspace = Some(&mut workspace);
    }

    tracing::trace!("fwd phase: execute");
    launcher(&mut launch, LaunchPhase::Execute)?;
    drop(launch);

    Ok(FwdOutputs {
        z,
        x,
        dmask,
        mu,
        rsigma,
    })
}
