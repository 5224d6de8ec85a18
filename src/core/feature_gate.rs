//! Per-tenant feature rollout control.
//!
//! A flag is on for a tenant when the tenant is allow-listed, or when the
//! tenant's stable bucket (0-99) falls below the flag's rollout percentage and
//! the tenant is not deny-listed. Champion promotion raises the percentage of
//! a `champion-{variant}` flag.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use parking_lot::RwLock;

use crate::config::{FeatureConfig, FlagConfig};

/// Feature-flag store queried synchronously by tenant and flag name.
pub trait FeatureFlagStore: Send + Sync {
    /// Whether `flag` is enabled for `tenant`.
    fn is_enabled(&self, tenant: &str, flag: &str) -> bool;

    /// Current rollout percentage of `flag` (0 when unknown).
    fn rollout_percentage(&self, flag: &str) -> u8;

    /// Add `step` percentage points to `flag`, creating it if needed.
    /// Returns the new percentage, capped at 100.
    fn increase_rollout(&self, flag: &str, step: u8) -> u8;
}

/// Stable 0-99 bucket for a tenant within a flag.
fn bucket(tenant: &str, flag: &str) -> u8 {
    let mut hasher = DefaultHasher::new();
    flag.hash(&mut hasher);
    tenant.hash(&mut hasher);
    #[allow(clippy::cast_possible_truncation)]
    let bucket = (hasher.finish() % 100) as u8;
    bucket
}

/// In-process flag store seeded from configuration.
pub struct InMemoryFeatureGate {
    flags: RwLock<HashMap<String, FlagConfig>>,
}

impl InMemoryFeatureGate {
    /// Build from configuration.
    #[must_use]
    pub fn new(cfg: &FeatureConfig) -> Self {
        Self {
            flags: RwLock::new(cfg.flags.clone()),
        }
    }

    /// Replace or insert a flag definition.
    pub fn set_flag(&self, name: impl Into<String>, flag: FlagConfig) {
        self.flags.write().insert(name.into(), flag);
    }

    /// Snapshot of a flag definition.
    #[must_use]
    pub fn flag(&self, name: &str) -> Option<FlagConfig> {
        self.flags.read().get(name).cloned()
    }
}

impl FeatureFlagStore for InMemoryFeatureGate {
    fn is_enabled(&self, tenant: &str, flag: &str) -> bool {
        let flags = self.flags.read();
        let Some(def) = flags.get(flag) else {
            return false;
        };
        if def.deny.iter().any(|t| t == tenant) {
            return false;
        }
        if def.allow.iter().any(|t| t == tenant) {
            return true;
        }
        match def.rollout_percentage {
            0 => false,
            pct if pct >= 100 => true,
            pct => bucket(tenant, flag) < pct,
        }
    }

    fn rollout_percentage(&self, flag: &str) -> u8 {
        self.flags
            .read()
            .get(flag)
            .map_or(0, |def| def.rollout_percentage)
    }

    fn increase_rollout(&self, flag: &str, step: u8) -> u8 {
        let mut flags = self.flags.write();
        let def = flags.entry(flag.to_string()).or_default();
        def.rollout_percentage = def.rollout_percentage.saturating_add(step).min(100);
        tracing::info!(
            flag,
            rollout_percentage = def.rollout_percentage,
            "feature rollout increased"
        );
        def.rollout_percentage
    }
}
