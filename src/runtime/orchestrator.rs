//! The running service: gateway, pools, and the shared state they use.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::OrchestratorConfig;
use crate::core::{
    Accepted, AdmissionError, AdmissionGateway, BreakerRegistry, CircuitSnapshot, CostLedger,
    ErrorBudget, FeatureFlagStore, IdempotencyStore, InMemoryUsageSink, JobKind, JobRecord,
    PoolStats, ResultMailbox, SubmissionId, SubmitRequest, WorkerPool,
};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Aggregate runtime statistics.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    /// Task pool statistics.
    pub tasks: PoolStats,
    /// Competition pool statistics.
    pub competitions: PoolStats,
    /// Current error-budget burn rate.
    pub burn_rate: f64,
    /// Breaker snapshots.
    pub breakers: Vec<CircuitSnapshot>,
}

/// Handles assembled by [`OrchestratorBuilder`](crate::builders::OrchestratorBuilder).
pub(crate) struct OrchestratorParts {
    pub config: OrchestratorConfig,
    pub gateway: Arc<AdmissionGateway>,
    pub mailbox: Arc<ResultMailbox>,
    pub budget: Arc<ErrorBudget>,
    pub ledger: Arc<CostLedger>,
    pub features: Arc<dyn FeatureFlagStore>,
    pub breakers: Arc<BreakerRegistry>,
    pub idempotency: Arc<IdempotencyStore>,
    pub usage_sink: Arc<InMemoryUsageSink>,
    pub task_pool: WorkerPool,
    pub competition_pool: WorkerPool,
    pub background: Vec<JoinHandle<()>>,
}

/// Admission-and-execution orchestrator.
///
/// Cloneable state is shared through `Arc`; nothing lives in globals.
pub struct Orchestrator {
    config: OrchestratorConfig,
    gateway: Arc<AdmissionGateway>,
    mailbox: Arc<ResultMailbox>,
    budget: Arc<ErrorBudget>,
    ledger: Arc<CostLedger>,
    features: Arc<dyn FeatureFlagStore>,
    breakers: Arc<BreakerRegistry>,
    usage_sink: Arc<InMemoryUsageSink>,
    task_pool: WorkerPool,
    competition_pool: WorkerPool,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub(crate) fn from_parts(mut parts: OrchestratorParts) -> Self {
        let idempotency = Arc::clone(&parts.idempotency);
        parts.background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PURGE_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = idempotency.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "purged expired idempotency records");
                }
            }
        }));

        Self {
            config: parts.config,
            gateway: parts.gateway,
            mailbox: parts.mailbox,
            budget: parts.budget,
            ledger: parts.ledger,
            features: parts.features,
            breakers: parts.breakers,
            usage_sink: parts.usage_sink,
            task_pool: parts.task_pool,
            competition_pool: parts.competition_pool,
            background: Mutex::new(parts.background),
        }
    }

    /// Admit a submission.
    ///
    /// # Errors
    ///
    /// The [`AdmissionError`] of the first gate that refused it.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Accepted, AdmissionError> {
        self.gateway.submit(request).await
    }

    /// Current record of a job.
    #[must_use]
    pub fn status(&self, id: SubmissionId) -> Option<JobRecord> {
        self.mailbox.get(id)
    }

    /// Configuration the orchestrator runs with.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Global error budget.
    #[must_use]
    pub const fn error_budget(&self) -> &Arc<ErrorBudget> {
        &self.budget
    }

    /// Tenant margin ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    /// Feature flag store.
    #[must_use]
    pub const fn features(&self) -> &Arc<dyn FeatureFlagStore> {
        &self.features
    }

    /// Circuit breakers by target.
    #[must_use]
    pub const fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Usage events drained so far.
    #[must_use]
    pub const fn usage_sink(&self) -> &Arc<InMemoryUsageSink> {
        &self.usage_sink
    }

    /// Pool statistics for `kind`.
    #[must_use]
    pub fn pool_stats(&self, kind: JobKind) -> PoolStats {
        match kind {
            JobKind::Task => self.task_pool.stats(),
            JobKind::Competition => self.competition_pool.stats(),
        }
    }

    /// Aggregate statistics.
    #[must_use]
    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            tasks: self.task_pool.stats(),
            competitions: self.competition_pool.stats(),
            burn_rate: self.budget.burn_rate(),
            breakers: self.breakers.snapshots(),
        }
    }

    /// Stop both pools after their current jobs and stop background tasks.
    pub async fn shutdown(&self) {
        info!("orchestrator shutting down");
        self.task_pool.shutdown().await;
        self.competition_pool.shutdown().await;
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
        info!("orchestrator stopped");
    }
}
