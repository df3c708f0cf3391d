//! Host implementation of the fused forward launchers.
//!
//! Every registered variant is an instantiation of [`launch_fwd`], which
//! answers Query from its [`KernelTraits`] and runs Execute through the
//! sequential grid emulation in [`kernel`].

mod kernel;
pub mod stats;

use norma_core::Element;

use crate::error::Result;
use crate::launch::{LaunchParams, LaunchPhase};
use crate::traits::{KernelTraits, STATS_BYTES};

/// Fill in grid size and scratch requirements for `traits`.
pub fn query(traits: &KernelTraits, launch: &mut LaunchParams<'_>) {
    let ctas_per_sm = launch
        .props
        .ctas_per_multiprocessor(traits.threads_per_cta(), traits.smem_bytes_fwd());
    let ctas_per_col = (launch.props.multiprocessor_count * ctas_per_sm / traits.ctas_per_row).max(1);
    launch.params.ctas_per_col = ctas_per_col;

    let rows_per_loop = ctas_per_col * traits.rows_per_cta();
    let row_iterations = (launch.params.rows + rows_per_loop - 1) / rows_per_loop;
    launch.elts_per_thread = row_iterations * traits.ldgs() * traits.elts_per_ldg;

    if traits.ctas_per_row > 1 {
        launch.barrier_size = 2 * ctas_per_col;
        launch.workspace_bytes = ctas_per_col * traits.warps_m * traits.ctas_per_row * STATS_BYTES * 2;
    } else {
        launch.barrier_size = 0;
        launch.workspace_bytes = 0;
    }

    tracing::debug!(
        hidden = traits.hidden_size,
        ctas_per_col,
        elts_per_thread = launch.elts_per_thread,
        barrier_size = launch.barrier_size,
        workspace_bytes = launch.workspace_bytes,
        "fwd query"
    );
}

/// Launcher for weight `W`, input `I`, residual `R` and output `O`
/// precisions (compute is f32) at a fixed hidden size and geometry.
pub fn launch_fwd<
    W: Element,
    I: Element,
    R: Element,
    O: Element,
    const HIDDEN: usize,
    const CTAS_PER_ROW: usize,
    const WARPS_M: usize,
    const WARPS_N: usize,
    const BYTES_PER_LDG: usize,
>(
    launch: &mut LaunchParams<'_>,
    phase: LaunchPhase,
) -> Result<()> {
    let traits = KernelTraits::new(
        HIDDEN,
        CTAS_PER_ROW,
        WARPS_M,
        WARPS_N,
        BYTES_PER_LDG,
        std::mem::size_of::<I>(),
    );
    match phase {
        LaunchPhase::Query => {
            query(&traits, launch);
            Ok(())
        }
        LaunchPhase::Execute => {
            tracing::trace!(hidden = HIDDEN, rows = launch.params.rows, "fwd execute");
            kernel::execute::<W, I, R, O>(&traits, launch)
        }
    }
}
