//! Built-in forward variants.
//!
//! Every hidden-size bucket is registered for the seven supported precision
//! combinations. Output precision follows the input; compute is f32.

use half::{bf16, f16};
use norma_core::{DType, Element};

use crate::host::launch_fwd;
use crate::key::LauncherKey;
use crate::registry::{FwdEntry, FwdRegistry};
use crate::traits::KernelTraits;
use crate::types::TypeCombo;

macro_rules! register_fwd_launcher {
    ($reg:expr, $hidden:literal, $wtype:ty, $itype:ty, $rtype:ty, $otype:ty,
     $ctas_per_row:literal, $warps_m:literal, $warps_n:literal, $bytes_per_ldg:literal) => {{
        let key = LauncherKey {
            types: TypeCombo::new(
                <$wtype as Element>::DTYPE,
                <$itype as Element>::DTYPE,
                <$rtype as Element>::DTYPE,
                <$otype as Element>::DTYPE,
                DType::F32,
            ),
            hidden_size: $hidden,
        };
        let entry = FwdEntry {
            launcher: launch_fwd::<
                $wtype,
                $itype,
                $rtype,
                $otype,
                $hidden,
                $ctas_per_row,
                $warps_m,
                $warps_n,
                $bytes_per_ldg,
            >,
            traits: KernelTraits::new(
                $hidden,
                $ctas_per_row,
                $warps_m,
                $warps_n,
                $bytes_per_ldg,
                std::mem::size_of::<$itype>(),
            ),
        };
        let replaced = $reg.register(key, entry);
        debug_assert!(replaced.is_none(), "duplicate fwd launcher {}", key);
    }};
}

/// Register one hidden-size bucket for every supported precision combo.
macro_rules! register_fwd_bucket {
    ($reg:expr, $hidden:literal, $ctas_per_row:literal, $warps_m:literal, $warps_n:literal, $bytes_per_ldg:literal) => {
        register_fwd_launcher!($reg, $hidden, f32, f32, f32, f32, $ctas_per_row, $warps_m, $warps_n, $bytes_per_ldg);
        register_fwd_launcher!($reg, $hidden, f32, f16, f32, f16, $ctas_per_row, $warps_m, $warps_n, $bytes_per_ldg);
        register_fwd_launcher!($reg, $hidden, f32, f16, f16, f16, $ctas_per_row, $warps_m, $warps_n, $bytes_per_ldg);
        register_fwd_launcher!($reg, $hidden, f32, bf16, f32, bf16, $ctas_per_row, $warps_m, $warps_n, $bytes_per_ldg);
        register_fwd_launcher!($reg, $hidden, f32, bf16, bf16, bf16, $ctas_per_row, $warps_m, $warps_n, $bytes_per_ldg);
        register_fwd_launcher!($reg, $hidden, f16, f16, f16, f16, $ctas_per_row, $warps_m, $warps_n, $bytes_per_ldg);
        register_fwd_launcher!($reg, $hidden, bf16, bf16, bf16, bf16, $ctas_per_row, $warps_m, $warps_n, $bytes_per_ldg);
    };
}

pub(crate) fn register_all(reg: &mut FwdRegistry) {
    //                        HIDDEN CTAS_PER_ROW WARPS_M WARPS_N BYTES_PER_LDG
    register_fwd_bucket!(reg,  256, 1, 4, 1, 16);
    register_fwd_bucket!(reg,  512, 1, 4, 1, 16);
    register_fwd_bucket!(reg,  768, 1, 4, 1, 16);
    register_fwd_bucket!(reg, 1024, 1, 4, 1, 16);
    register_fwd_bucket!(reg, 1280, 1, 4, 1, 16);
    register_fwd_bucket!(reg, 1536, 1, 4, 1, 16);
    register_fwd_bucket!(reg, 2048, 1, 4, 1, 16);
    register_fwd_bucket!(reg, 2560, 1, 4, 1, 16);
    register_fwd_bucket!(reg, 3072, 1, 1, 4, 16);
    register_fwd_bucket!(reg, 4096, 1, 1, 4, 16);
    register_fwd_bucket!(reg, 5120, 1, 1, 4, 16);
    register_fwd_bucket!(reg, 6144, 2, 1, 4, 16);
    register_fwd_bucket!(reg, 7168, 1, 1, 4, 16);
    register_fwd_bucket!(reg, 8192, 2, 1, 4, 16);
}
