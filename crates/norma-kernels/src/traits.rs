//! Launch geometry of a specialized forward kernel.

/// Threads per warp.
pub const WARP_SIZE: usize = 32;

/// Bytes of one row-statistics record (mean, m2) in the cross-CTA workspace.
pub const STATS_BYTES: usize = 2 * std::mem::size_of::<f32>();

/// Geometry of one kernel variant.
///
/// A row is covered by `ctas_per_row` cooperating CTAs; each CTA holds
/// `warps_m` rows at a time and spreads a row over `warps_n` warps. Every
/// thread loads `bytes_per_ldg` bytes of input per load and issues `ldgs`
/// loads per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelTraits {
    pub hidden_size: usize,
    pub ctas_per_row: usize,
    pub warps_m: usize,
    pub warps_n: usize,
    pub bytes_per_ldg: usize,
    pub elts_per_ldg: usize,
}

impl KernelTraits {
    pub const fn new(
        hidden_size: usize,
        ctas_per_row: usize,
        warps_m: usize,
        warps_n: usize,
        bytes_per_ldg: usize,
        input_elem_size: usize,
    ) -> Self {
        Self {
            hidden_size,
            ctas_per_row,
            warps_m,
            warps_n,
            bytes_per_ldg,
            elts_per_ldg: bytes_per_ldg / input_elem_size,
        }
    }

    pub const fn threads_per_row(&self) -> usize {
        self.warps_n * WARP_SIZE
    }

    pub const fn threads_per_cta(&self) -> usize {
        self.warps_m * self.threads_per_row()
    }

    pub const fn rows_per_cta(&self) -> usize {
        self.warps_m
    }

    /// Vectors of `elts_per_ldg` elements in one padded row.
    pub const fn vec_cols(&self) -> usize {
        self.hidden_size / self.elts_per_ldg
    }

    /// Vectors covered by one load across all CTAs of a row.
    pub const fn vec_cols_per_ldg(&self) -> usize {
        self.ctas_per_row * self.threads_per_row()
    }

    /// Loads per thread per row.
    pub const fn ldgs(&self) -> usize {
        self.vec_cols() / self.vec_cols_per_ldg()
    }

    /// Shared memory for the in-CTA statistics reduction.
    pub const fn smem_bytes_fwd(&self) -> usize {
        self.warps_m * self.warps_n * STATS_BYTES * 2
    }

    /// Whether every padded row splits into whole loads for every thread.
    pub const fn is_valid(&self) -> bool {
        self.ctas_per_row > 0
            && self.warps_m > 0
            && self.warps_n > 0
            && self.elts_per_ldg > 0
            && self.hidden_size % self.elts_per_ldg == 0
            && self.vec_cols() % self.vec_cols_per_ldg() == 0
            && self.ldgs() > 0
    }

    /// Column handled by thread `(warp_n, lane)` of CTA `bidn` at load `ldg`,
    /// element `elt` of the loaded vector.
    #[inline]
    pub const fn column(&self, bidn: usize, warp_n: usize, lane: usize, ldg: usize, elt: usize) -> usize {
        let vec_col = ldg * self.vec_cols_per_ldg()
            + bidn * self.threads_per_row()
            + warp_n * WARP_SIZE
            + lane;
        vec_col * self.elts_per_ldg + elt
    }

    /// Columns below `cols` that CTA `bidn` of a row covers.
    pub fn cols_in_cta(&self, bidn: usize, cols: usize) -> usize {
        let span = self.threads_per_row() * self.elts_per_ldg;
        (0..self.ldgs())
            .map(|ldg| {
                let start = self.column(bidn, 0, 0, ldg, 0);
                cols.saturating_sub(start).min(span)
            })
            .sum()
    }
}
