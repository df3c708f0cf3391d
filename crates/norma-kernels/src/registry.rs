//! Kernel registry and launcher resolution.
//!
//! The process-wide registry is built once, on first use, from the variant
//! table in [`crate::kernels`] and is read-only afterwards.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{DispatchError, Result};
use crate::key::LauncherKey;
use crate::launch::FwdFunction;
use crate::traits::KernelTraits;
use crate::types::TypeCombo;

/// One registered variant.
#[derive(Debug, Clone, Copy)]
pub struct FwdEntry {
    pub launcher: FwdFunction,
    pub traits: KernelTraits,
}

/// Map from dispatch key to launcher.
#[derive(Debug, Default)]
pub struct FwdRegistry {
    entries: HashMap<LauncherKey, FwdEntry>,
}

impl FwdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in variant.
    pub fn with_builtin_kernels() -> Self {
        let mut reg = Self::new();
        crate::kernels::register_all(&mut reg);
        reg
    }

    /// Bind `key` to a launcher, returning the entry it replaced.
    pub fn register(&mut self, key: LauncherKey, entry: FwdEntry) -> Option<FwdEntry> {
        self.entries.insert(key, entry)
    }

    pub fn get(&self, key: &LauncherKey) -> Option<&FwdEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered keys, ordered by type key then hidden size.
    pub fn keys(&self) -> Vec<LauncherKey> {
        let mut keys: Vec<LauncherKey> = self.entries.keys().copied().collect();
        keys.sort_by_key(|k| k.to_bits().unwrap_or(u64::MAX));
        keys
    }

    /// Exact-match lookup. `hidden_size` must already be rounded to a bucket.
    pub fn resolve(&self, types: TypeCombo, hidden_size: u32) -> Result<FwdFunction> {
        let key = LauncherKey::new(types, hidden_size)?;
        match self.entries.get(&key) {
            Some(entry) => {
                tracing::debug!(%key, "resolved fwd launcher");
                Ok(entry.launcher)
            }
            None => Err(DispatchError::UnsupportedConfig {
                hidden_size,
                wtype: types.weight,
                itype: types.input,
                rtype: types.residual,
                otype: types.output,
                ctype: types.compute,
            }),
        }
    }
}

static FWD_REGISTRY: OnceLock<FwdRegistry> = OnceLock::new();

/// The process-wide registry.
pub fn fwd_registry() -> &'static FwdRegistry {
    FWD_REGISTRY.get_or_init(|| {
        let reg = FwdRegistry::with_builtin_kernels();
        tracing::debug!(entries = reg.len(), "built fwd kernel registry");
        reg
    })
}

/// Resolve a launcher from the process-wide registry.
pub fn get_fwd_launcher(types: TypeCombo, hidden_size: u32) -> Result<FwdFunction> {
    fwd_registry().resolve(types, hidden_size)
}
