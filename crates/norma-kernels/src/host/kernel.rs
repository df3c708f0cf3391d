//! Execute phase: sequential emulation of the fused forward grid.
//!
//! The grid is `ctas_per_col x CTAS_PER_ROW` CTAs. CTA `(bidm, bidn)` walks
//! rows `bidm * WARPS_M + warp_m`, stepping by `ctas_per_col * WARPS_M`, and
//! owns the column slice given by [`KernelTraits::column`]. When a row spans
//! several CTAs, each publishes its partial statistics to the workspace and
//! arrives on the barrier before the partials are combined.

use norma_core::{DType, Element, NormaError, Tensor};

use super::stats::Stats;
use crate::error::{DispatchError, Result};
use crate::launch::{FwdParams, LaunchParams};
use crate::traits::{KernelTraits, STATS_BYTES, WARP_SIZE};

fn check_dtype(t: &Tensor, expected: DType) -> Result<()> {
    if t.dtype() != expected {
        return Err(NormaError::DTypeMismatch {
            expected,
            got: t.dtype(),
        }
        .into());
    }
    Ok(())
}

fn check_numel(t: &Tensor, needed: usize, what: &str) -> Result<()> {
    if t.numel() < needed {
        return Err(DispatchError::Kernel(format!(
            "{what} holds {} elements, launch needs {needed}",
            t.numel()
        )));
    }
    Ok(())
}

/// Buffer dtypes must match the variant the launcher was instantiated for.
fn check_buffers<W: Element, I: Element, R: Element, O: Element>(p: &FwdParams<'_>) -> Result<()> {
    let (rows, cols) = (p.rows, p.cols);
    check_dtype(p.x0, I::DTYPE)?;
    check_dtype(p.gamma, W::DTYPE)?;
    check_numel(p.gamma, cols, "gamma")?;
    if let Some(beta) = p.beta {
        check_dtype(beta, W::DTYPE)?;
        check_numel(beta, cols, "beta")?;
    }
    if let Some(residual) = p.residual {
        check_dtype(residual, R::DTYPE)?;
        check_numel(residual, rows * cols, "residual")?;
    }
    if let Some(rowscale) = p.rowscale {
        check_dtype(rowscale, I::DTYPE)?;
        check_numel(rowscale, rows, "rowscale")?;
    }
    if let Some(colscale) = p.colscale {
        check_dtype(colscale, W::DTYPE)?;
        check_numel(colscale, cols, "colscale")?;
    }
    for subset in [p.x0_subset, p.z_subset].into_iter().flatten() {
        check_dtype(subset, DType::I32)?;
        check_numel(subset, rows, "subset")?;
    }
    if !p.has_subset() {
        check_numel(p.x0, rows * cols, "x0")?;
        check_numel(p.z, rows * cols, "z")?;
    }
    check_dtype(p.z, O::DTYPE)?;
    if let Some(x) = p.x.as_deref() {
        check_dtype(x, R::DTYPE)?;
        check_numel(x, rows * cols, "x")?;
    }
    if let Some(dmask) = p.dmask.as_deref() {
        check_dtype(dmask, DType::U8)?;
        check_numel(dmask, rows * cols, "dmask")?;
    }
    check_dtype(p.mu, DType::F32)?;
    check_dtype(p.rs, DType::F32)?;
    check_numel(p.mu, rows, "mu")?;
    check_numel(p.rs, rows, "rs")?;
    Ok(())
}

/// Translate a 1-based subset entry into a physical row, `None` for 0.
fn subset_row(indices: &[u8], row: usize, limit: usize, arg: &'static str) -> Result<Option<usize>> {
    let idx = i32::load(indices, row);
    if idx == 0 {
        return Ok(None);
    }
    if idx < 0 || idx as usize > limit {
        return Err(DispatchError::Precondition {
            arg,
            reason: format!("entry {row} is {idx}, valid range is 0..={limit}"),
        });
    }
    Ok(Some(idx as usize - 1))
}

pub(crate) fn execute<W: Element, I: Element, R: Element, O: Element>(
    traits: &KernelTraits,
    launch: &mut LaunchParams<'_>,
) -> Result<()> {
    let elts_per_thread = launch.elts_per_thread;
    let p = &mut launch.params;
    let ctas_per_col = p.ctas_per_col;
    if ctas_per_col == 0 {
        return Err(DispatchError::Kernel("Execute launched before Query".into()));
    }
    if p.cols > traits.hidden_size {
        return Err(DispatchError::Kernel(format!(
            "{} columns do not fit a {}-column kernel",
            p.cols, traits.hidden_size
        )));
    }
    check_buffers::<W, I, R, O>(p)?;

    let (rows, cols) = (p.rows, p.cols);
    let ctas_per_row = traits.ctas_per_row;
    let warps_m = traits.warps_m;
    let cooperative = ctas_per_row > 1;

    let philox = match (p.has_dropout(), p.philox_args) {
        (false, _) => None,
        (true, Some(state)) => Some(state),
        (true, None) => {
            return Err(DispatchError::Kernel("dropout requested without philox state".into()));
        }
    };

    // Scratch for the cross-CTA reduction, as (workspace bytes, barrier bytes).
    let mut scratch = None;
    if cooperative {
        let ws_needed = ctas_per_col * warps_m * ctas_per_row * STATS_BYTES * 2;
        let workspace = p
            .workspace
            .as_deref_mut()
            .ok_or_else(|| DispatchError::Kernel("cross-CTA workspace missing".into()))?;
        if workspace.storage_ref().nbytes() < ws_needed {
            return Err(DispatchError::Kernel(format!(
                "workspace holds {} bytes, launch needs {ws_needed}",
                workspace.storage_ref().nbytes()
            )));
        }
        let barrier = p
            .barrier
            .as_deref_mut()
            .ok_or_else(|| DispatchError::Kernel("cross-CTA barrier missing".into()))?;
        check_dtype(barrier, DType::I32)?;
        check_numel(barrier, 2 * ctas_per_col, "barrier")?;
        scratch = Some((workspace.as_bytes_mut()?, barrier.as_bytes_mut()?));
    }

    let x0 = p.x0.as_bytes()?;
    let x0_rows = p.x0.shape().dim(0).unwrap_or(0);
    let gamma = p.gamma.as_bytes()?;
    let beta = p.beta.map(Tensor::as_bytes).transpose()?;
    let residual = p.residual.map(Tensor::as_bytes).transpose()?;
    let rowscale = p.rowscale.map(Tensor::as_bytes).transpose()?;
    let colscale = p.colscale.map(Tensor::as_bytes).transpose()?;
    let x0_subset = p.x0_subset.map(Tensor::as_bytes).transpose()?;
    let z_subset = p.z_subset.map(Tensor::as_bytes).transpose()?;
    let z_rows = p.z.shape().dim(0).unwrap_or(0);
    let z = p.z.as_bytes_mut()?;
    let mut x_out = p.x.as_deref_mut().map(Tensor::as_bytes_mut).transpose()?;
    let mut dmask = p.dmask.as_deref_mut().map(Tensor::as_bytes_mut).transpose()?;
    let mu_out = p.mu.as_bytes_mut()?;
    let rs_out = p.rs.as_bytes_mut()?;

    let threads_per_row = traits.threads_per_row();
    let threads_per_cta = traits.threads_per_cta();
    let ldgs = traits.ldgs();
    let elts = traits.elts_per_ldg;
    let rows_per_loop = ctas_per_col * warps_m;
    let iterations = (rows + rows_per_loop - 1) / rows_per_loop;
    if philox.is_some() && iterations * ldgs * elts > elts_per_thread {
        return Err(DispatchError::Kernel(format!(
            "launch draws {} values per thread, only {elts_per_thread} reserved",
            iterations * ldgs * elts
        )));
    }

    let mut xrows = vec![vec![0.0f32; cols]; warps_m];
    let mut partials = vec![vec![Stats::default(); ctas_per_row]; warps_m];

    for it in 0..iterations {
        let buf = it % 2;
        for bidm in 0..ctas_per_col {
            let row_of = |warp_m: usize| it * rows_per_loop + bidm * warps_m + warp_m;

            for bidn in 0..ctas_per_row {
                for warp_m in 0..warps_m {
                    let row = row_of(warp_m);
                    if row >= rows {
                        continue;
                    }
                    let (row_x0, rowscale_val) = match x0_subset {
                        Some(idx) => (subset_row(idx, row, x0_rows, "x0_subset")?, p.rowscale_const),
                        None => (Some(row), rowscale.map_or(1.0, |rsc| I::load(rsc, row).to_f32())),
                    };

                    let xrow = &mut xrows[warp_m];
                    let mut stats = Stats::default();
                    for warp_n in 0..traits.warps_n {
                        for lane in 0..WARP_SIZE {
                            let tid = (bidm * ctas_per_row + bidn) * threads_per_cta
                                + warp_m * threads_per_row
                                + warp_n * WARP_SIZE
                                + lane;
                            for ldg in 0..ldgs {
                                for e in 0..elts {
                                    let col = traits.column(bidn, warp_n, lane, ldg, e);
                                    if col >= cols {
                                        continue;
                                    }
                                    let flat = row * cols + col;
                                    let mut v = 0.0f32;
                                    if let Some(src) = row_x0 {
                                        v = I::load(x0, src * cols + col).to_f32() * rowscale_val;
                                        if let Some(state) = philox {
                                            let draw = (it * ldgs * elts + ldg * elts + e) as u64;
                                            let keep = state.uniform(tid as u64, draw) <= p.dropout_keep_p;
                                            if let Some(mask) = dmask.as_deref_mut() {
                                                mask[flat] = u8::from(keep);
                                            }
                                            v = if keep { v * p.dropout_scale } else { 0.0 };
                                        }
                                        if let Some(cs) = colscale {
                                            v *= W::load(cs, col).to_f32();
                                        }
                                    }
                                    if let Some(res) = residual {
                                        v += R::load(res, flat).to_f32();
                                    }
                                    // x is held at residual precision.
                                    let v = R::from_f32(v);
                                    if let Some(xs) = x_out.as_deref_mut() {
                                        v.store(xs, flat);
                                    }
                                    let v = v.to_f32();
                                    xrow[col] = v;
                                    stats.push(v);
                                }
                            }
                        }
                    }
                    partials[warp_m][bidn] = stats;

                    if let Some((ws, _)) = scratch.as_mut() {
                        let slot = ((buf * ctas_per_col + bidm) * warps_m + warp_m) * ctas_per_row + bidn;
                        stats.mean.store(ws, 2 * slot);
                        stats.m2.store(ws, 2 * slot + 1);
                    }
                }

                if let Some((_, barrier)) = scratch.as_mut() {
                    let slot = 2 * bidm + buf;
                    let arrived = i32::load(barrier, slot) + 1;
                    arrived.store(barrier, slot);
                }
            }

            if let Some((ws, barrier)) = scratch.as_ref() {
                let expected = (ctas_per_row * (it / 2 + 1)) as i32;
                let arrived = i32::load(barrier, 2 * bidm + buf);
                if arrived != expected {
                    return Err(DispatchError::Kernel(format!(
                        "barrier slot {} saw {arrived} arrivals, expected {expected}",
                        2 * bidm + buf
                    )));
                }
                for (warp_m, row_partials) in partials.iter_mut().enumerate() {
                    for (bidn, partial) in row_partials.iter_mut().enumerate() {
                        let slot = ((buf * ctas_per_col + bidm) * warps_m + warp_m) * ctas_per_row + bidn;
                        partial.mean = f32::load(ws, 2 * slot);
                        partial.m2 = f32::load(ws, 2 * slot + 1);
                    }
                }
            }

            for warp_m in 0..warps_m {
                let row = row_of(warp_m);
                if row >= rows {
                    continue;
                }
                let stats = partials[warp_m]
                    .iter()
                    .enumerate()
                    .map(|(bidn, s)| Stats::new(traits.cols_in_cta(bidn, cols), s.mean, s.m2))
                    .fold(Stats::default(), Stats::merge);
                let rs = stats.rsigma(p.inverse_cols, p.epsilon, p.is_rms_norm);
                stats.mean.store(mu_out, row);
                rs.store(rs_out, row);

                let row_z = match z_subset {
                    Some(idx) => subset_row(idx, row, z_rows, "z_subset")?,
                    None => Some(row),
                };
                let Some(dst) = row_z else { continue };
                let xrow = &xrows[warp_m];
                for col in 0..cols {
                    let y = if p.is_rms_norm {
                        xrow[col] * rs
                    } else {
                        (xrow[col] - stats.mean) * rs
                    };
                    let mut out = W::load(gamma, col).to_f32() * y;
                    if let Some(b) = beta {
                        out += W::load(b, col).to_f32();
                    }
                    O::from_f32(out).store(z, dst * cols + col);
                }
            }
        }
    }
    Ok(())
}
