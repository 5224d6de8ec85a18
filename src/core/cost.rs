//! Cost guardrail: spend forecasting and per-tenant margin ledger.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::CostConfig;
use crate::core::{AdmissionError, JobPayload, SubmissionId, TaskPayload};

/// Forecast computed during admission and discarded after the decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostForecast {
    /// Submission the forecast belongs to.
    pub submission_id: SubmissionId,
    /// Projected spend.
    pub estimated_cost: f64,
    /// Tenant margin left before this submission.
    pub tenant_margin_remaining: f64,
}

/// Estimates the cost of executing a payload.
pub trait CostEstimator: Send + Sync {
    /// Cost of one task execution.
    fn task_cost(&self, payload: &TaskPayload) -> f64;

    /// Cost of a full payload; competitions multiply the per-variant cost by
    /// the number of competitors.
    fn estimate(&self, payload: &JobPayload, default_competitors: usize) -> f64 {
        match payload {
            JobPayload::Task(task) => self.task_cost(task),
            JobPayload::Competition(competition) => {
                let competitors = competition
                    .competitors
                    .as_ref()
                    .map_or(default_competitors, Vec::len);
                #[allow(clippy::cast_precision_loss)]
                let factor = competitors as f64;
                self.task_cost(&competition.task) * factor
            }
        }
    }
}

/// Linear estimator driven by [`CostConfig`].
#[derive(Debug, Clone)]
pub struct ConfiguredCostEstimator {
    base: f64,
    per_platform: f64,
}

impl ConfiguredCostEstimator {
    /// Build from configuration.
    #[must_use]
    pub const fn new(cfg: &CostConfig) -> Self {
        Self {
            base: cfg.task_base_cost,
            per_platform: cfg.per_platform_cost,
        }
    }
}

impl CostEstimator for ConfiguredCostEstimator {
    fn task_cost(&self, payload: &TaskPayload) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let platforms = payload.platforms.len() as f64;
        self.per_platform.mul_add(platforms, self.base)
    }
}

#[derive(Debug, Default)]
struct TenantAccount {
    consumed: f64,
}

/// Per-tenant ledger of consumed margin.
pub struct CostLedger {
    default_margin: f64,
    limits: HashMap<String, f64>,
    accounts: Mutex<HashMap<String, TenantAccount>>,
}

impl CostLedger {
    /// Build from configuration.
    #[must_use]
    pub fn new(cfg: &CostConfig) -> Self {
        Self {
            default_margin: cfg.default_margin,
            limits: cfg.tenant_margins.clone(),
            accounts: Mutex::new(HashMap::new()),
        }
    }

    fn limit_for(&self, tenant: &str) -> f64 {
        self.limits
            .get(tenant)
            .copied()
            .unwrap_or(self.default_margin)
    }

    /// Margin the tenant may still spend.
    #[must_use]
    pub fn remaining(&self, tenant: &str) -> f64 {
        let consumed = self
            .accounts
            .lock()
            .get(tenant)
            .map_or(0.0, |account| account.consumed);
        self.limit_for(tenant) - consumed
    }

    /// Check and record in one step so concurrent submissions cannot
    /// overdraw the tenant together.
    pub fn try_reserve(
        &self,
        tenant: &str,
        submission_id: SubmissionId,
        estimated_cost: f64,
    ) -> Result<CostForecast, AdmissionError> {
        let limit = self.limit_for(tenant);
        let mut accounts = self.accounts.lock();
        let consumed = accounts.get(tenant).map_or(0.0, |account| account.consumed);
        let remaining = limit - consumed;
        if remaining - estimated_cost < 0.0 {
            return Err(AdmissionError::MarginExceeded {
                tenant: tenant.to_string(),
                forecast: estimated_cost,
                remaining,
            });
        }
        accounts.entry(tenant.to_string()).or_default().consumed += estimated_cost;
        Ok(CostForecast {
            submission_id,
            estimated_cost,
            tenant_margin_remaining: remaining,
        })
    }

    /// Return a reservation that did not lead to an enqueue.
    pub fn refund(&self, tenant: &str, amount: f64) {
        let mut accounts = self.accounts.lock();
        if let Some(account) = accounts.get_mut(tenant) {
            account.consumed = (account.consumed - amount).max(0.0);
        }
    }

    /// Total spend recorded for the tenant.
    #[must_use]
    pub fn consumed(&self, tenant: &str) -> f64 {
        self.accounts
            .lock()
            .get(tenant)
            .map_or(0.0, |account| account.consumed)
    }
}
