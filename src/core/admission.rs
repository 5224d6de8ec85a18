//! Admission gateway: validation and the gating pipeline in front of the queues.
//!
//! Gates run in a fixed order and stop at the first refusal:
//!
//! 1. idempotency: replay a cached acceptance, or wait for an in-flight twin;
//!    a key reused for a different payload is a conflict
//! 2. cost guardrail: reserve the forecast against the tenant's margin
//! 3. error budget: refuse while the burn rate is at or above 1.0
//! 4. feature gate: the kind's `{kind}-v2` flag must be on for the tenant
//! 5. enqueue
//!
//! A refusal after the cost reservation refunds it, and dropping the
//! idempotency claim lets a waiting duplicate try again.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::core::cost::{CostEstimator, CostLedger};
use crate::core::error_budget::ErrorBudget;
use crate::core::feature_gate::FeatureFlagStore;
use crate::core::idempotency::{Claim, IdempotencyStore};
use crate::core::mailbox::ResultMailbox;
use crate::core::queue::{Job, JobQueue};
use crate::core::usage::{UsageEvent, UsageReporter};
use crate::core::{Accepted, AdmissionError, JobKind, JobPayload, SubmitRequest, Submission};
use crate::util::clock::now_ms;
use crate::util::metrics::{record_rejection, record_submission};

/// Components the gateway consults.
pub struct AdmissionParts {
    /// Idempotency store.
    pub idempotency: Arc<IdempotencyStore>,
    /// Cost estimator.
    pub estimator: Arc<dyn CostEstimator>,
    /// Per-tenant margin ledger.
    pub ledger: Arc<CostLedger>,
    /// Global error budget.
    pub budget: Arc<ErrorBudget>,
    /// Feature flags.
    pub features: Arc<dyn FeatureFlagStore>,
    /// Queue for tasks.
    pub task_queue: Arc<JobQueue>,
    /// Queue for competitions.
    pub competition_queue: Arc<JobQueue>,
    /// Job record store.
    pub mailbox: Arc<ResultMailbox>,
    /// Usage event sender.
    pub usage: UsageReporter,
    /// Competitor count assumed when a competition names none.
    pub default_competitors: usize,
    /// Platforms a task may publish to.
    pub allowed_platforms: HashSet<String>,
    /// Variant names a competition may race.
    pub known_variants: HashSet<String>,
}

/// Entry point for every submission.
pub struct AdmissionGateway {
    parts: AdmissionParts,
}

impl AdmissionGateway {
    /// Build a gateway.
    #[must_use]
    pub const fn new(parts: AdmissionParts) -> Self {
        Self { parts }
    }

    /// Queue serving `kind`.
    #[must_use]
    pub fn queue(&self, kind: JobKind) -> &Arc<JobQueue> {
        match kind {
            JobKind::Task => &self.parts.task_queue,
            JobKind::Competition => &self.parts.competition_queue,
        }
    }

    /// Admit a submission or explain why not.
    ///
    /// # Errors
    ///
    /// The first [`AdmissionError`] raised by validation or a gate.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Accepted, AdmissionError> {
        let tenant = request.tenant_id.clone();
        let kind = request.kind();
        let result = self.admit(request).await;
        if let Err(e) = &result {
            record_rejection(e.reason());
            debug!(tenant = %tenant, kind = %kind, reason = e.reason(), error = %e, "admission rejected");
        }
        result
    }

    async fn admit(&self, request: SubmitRequest) -> Result<Accepted, AdmissionError> {
        if request.tenant_id.trim().is_empty() {
            return Err(AdmissionError::MissingTenant);
        }
        request.payload.validate()?;
        self.check_catalog(&request.payload)?;

        let claim = match &request.idempotency_key {
            Some(key) => match self
                .parts
                .idempotency
                .claim(&request.tenant_id, key, &request.payload)
                .await
            {
                Claim::Replay(accepted) => {
                    debug!(tenant = %request.tenant_id, key = %key, id = %accepted.id, "replaying idempotent submission");
                    return Ok(accepted);
                }
                Claim::Conflict => {
                    return Err(AdmissionError::IdempotencyConflict { key: key.clone() });
                }
                Claim::Owner(guard) => Some(guard),
            },
            None => None,
        };

        let id = Uuid::new_v4();
        let estimated = self
            .parts
            .estimator
            .estimate(&request.payload, self.parts.default_competitors);
        let forecast = self.parts.ledger.try_reserve(&request.tenant_id, id, estimated)?;

        let accepted = match self.gate_and_enqueue(id, &request) {
            Ok(accepted) => accepted,
            Err(e) => {
                self.parts.ledger.refund(&request.tenant_id, forecast.estimated_cost);
                return Err(e);
            }
        };

        if let Some(guard) = claim {
            guard.commit(accepted);
        }
        self.parts.usage.emit(UsageEvent {
            submission_id: id,
            forecast_cost: forecast.estimated_cost,
            tenant_id: request.tenant_id.clone(),
            kind: accepted.kind,
            source: request.source.clone(),
            created_at_ms: now_ms(),
        });
        record_submission(accepted.kind.as_str(), &request.tenant_id);
        info!(
            id = %id,
            tenant = %request.tenant_id,
            kind = %accepted.kind,
            priority = ?request.priority,
            forecast = forecast.estimated_cost,
            margin_remaining = forecast.tenant_margin_remaining,
            "submission accepted"
        );
        Ok(accepted)
    }

    fn check_catalog(&self, payload: &JobPayload) -> Result<(), AdmissionError> {
        let (task, competitors) = match payload {
            JobPayload::Task(task) => (task, None),
            JobPayload::Competition(competition) => {
                (&competition.task, competition.competitors.as_deref())
            }
        };
        if let Some(platform) = task
            .platforms
            .iter()
            .find(|p| !self.parts.allowed_platforms.contains(*p))
        {
            return Err(AdmissionError::Validation(format!(
                "unsupported platform `{platform}`"
            )));
        }
        if let Some(name) = competitors
            .unwrap_or_default()
            .iter()
            .find(|n| !self.parts.known_variants.contains(*n))
        {
            return Err(AdmissionError::Validation(format!("unknown variant `{name}`")));
        }
        Ok(())
    }

    fn gate_and_enqueue(&self, id: Uuid, request: &SubmitRequest) -> Result<Accepted, AdmissionError> {
        let burn_rate = self.parts.budget.burn_rate();
        if burn_rate >= 1.0 {
            return Err(AdmissionError::BudgetExhausted { burn_rate });
        }

        let kind = request.kind();
        let flag = kind.feature_flag();
        if !self.parts.features.is_enabled(&request.tenant_id, &flag) {
            return Err(AdmissionError::FeatureDisabled {
                flag,
                tenant: request.tenant_id.clone(),
            });
        }

        let submission = Submission {
            id,
            tenant_id: request.tenant_id.clone(),
            payload: request.payload.clone(),
            idempotency_key: request.idempotency_key.clone(),
            priority: request.priority,
            created_at_ms: now_ms(),
        };
        // The record must exist before a worker can pick the job up.
        self.parts.mailbox.insert_queued(&submission);
        if let Err(e) = self.queue(kind).enqueue(Job::new(submission)) {
            self.parts.mailbox.remove(id);
            return Err(e.into());
        }
        Ok(Accepted::new(id, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::{CostConfig, ErrorBudgetConfig, FeatureConfig, FlagConfig};
    use crate::core::cost::ConfiguredCostEstimator;
    use crate::core::feature_gate::InMemoryFeatureGate;
    use crate::core::{CompetitionPayload, TaskPayload};

    const PLATFORMS: [&str; 3] = ["x", "linkedin", "threads"];

    struct Fixture {
        gateway: AdmissionGateway,
        ledger: Arc<CostLedger>,
        budget: Arc<ErrorBudget>,
        features: Arc<InMemoryFeatureGate>,
        tasks: Arc<JobQueue>,
        competitions: Arc<JobQueue>,
        mailbox: Arc<ResultMailbox>,
    }

    fn fixture(margin: f64, depth: usize) -> Fixture {
        let cost = CostConfig {
            default_margin: margin,
            ..CostConfig::default()
        };
        let ledger = Arc::new(CostLedger::new(&cost));
        let budget = Arc::new(ErrorBudget::new(&ErrorBudgetConfig::default()));
        let features = Arc::new(InMemoryFeatureGate::new(&FeatureConfig::default()));
        let tasks = Arc::new(JobQueue::new(JobKind::Task, depth));
        let competitions = Arc::new(JobQueue::new(JobKind::Competition, depth));
        let mailbox = Arc::new(ResultMailbox::new(100));
        let (usage, _rx) = UsageReporter::channel(16);

        let gateway = AdmissionGateway::new(AdmissionParts {
            idempotency: Arc::new(IdempotencyStore::new(Duration::from_secs(60))),
            estimator: Arc::new(ConfiguredCostEstimator::new(&cost)),
            ledger: Arc::clone(&ledger),
            budget: Arc::clone(&budget),
            features: Arc::clone(&features) as Arc<dyn FeatureFlagStore>,
            task_queue: Arc::clone(&tasks),
            competition_queue: Arc::clone(&competitions),
            mailbox: Arc::clone(&mailbox),
            usage,
            default_competitors: 4,
            allowed_platforms: PLATFORMS.iter().map(|p| (*p).to_string()).collect(),
            known_variants: (0..10).map(|i| format!("v{i}")).collect(),
        });
        Fixture {
            gateway,
            ledger,
            budget,
            features,
            tasks,
            competitions,
            mailbox,
        }
    }

    fn task_request(tenant: &str, platforms: usize) -> SubmitRequest {
        SubmitRequest::new(
            tenant,
            JobPayload::Task(TaskPayload {
                text: "Great launch today".into(),
                platforms: PLATFORMS[..platforms].iter().map(|p| (*p).to_string()).collect(),
                tags: Vec::new(),
            }),
        )
    }

    #[tokio::test]
    async fn test_accepts_and_enqueues() {
        let f = fixture(100.0, 10);
        let accepted = f.gateway.submit(task_request("acme", 2)).await.unwrap();
        assert_eq!(accepted.kind, JobKind::Task);
        assert_eq!(f.tasks.len(), 1);
        assert!(f.mailbox.get(accepted.id).is_some());
        assert!((f.ledger.consumed("acme") - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_idempotent_replay_creates_one_job() {
        let f = fixture(100.0, 10);
        let first = f
            .gateway
            .submit(task_request("acme", 0).with_idempotency_key("k1"))
            .await
            .unwrap();
        let second = f
            .gateway
            .submit(task_request("acme", 0).with_idempotency_key("k1"))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(f.tasks.len(), 1);
        assert!((f.ledger.consumed("acme") - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_margin_exceeded_enqueues_nothing() {
        let f = fixture(10.0, 10);
        let request = SubmitRequest::new(
            "acme",
            JobPayload::Competition(CompetitionPayload {
                task: TaskPayload {
                    text: "hi".into(),
                    platforms: vec!["x".into(), "linkedin".into()],
                    tags: Vec::new(),
                },
                competitors: Some((0..10).map(|i| format!("v{i}")).collect()),
            }),
        );
        // 1.5 per variant × 10 variants = 15 > 10.
        let err = f.gateway.submit(request).await.unwrap_err();
        assert!(matches!(err, AdmissionError::MarginExceeded { .. }));
        assert!(f.competitions.is_empty());
        assert!(f.ledger.consumed("acme").abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_budget_exhausted_refunds_reservation() {
        let f = fixture(100.0, 10);
        f.budget.force_burn_rate(Some(1.0));
        let err = f.gateway.submit(task_request("acme", 0)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::BudgetExhausted { .. }));
        assert!(f.tasks.is_empty());
        assert!(f.ledger.consumed("acme").abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_feature_disabled() {
        let f = fixture(100.0, 10);
        f.features.set_flag(
            "task-v2",
            FlagConfig {
                rollout_percentage: 100,
                allow: Vec::new(),
                deny: vec!["acme".into()],
            },
        );
        let err = f.gateway.submit(task_request("acme", 0)).await.unwrap_err();
        assert_eq!(
            err,
            AdmissionError::FeatureDisabled {
                flag: "task-v2".into(),
                tenant: "acme".into()
            }
        );
        assert!(f.gateway.submit(task_request("globex", 0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_queue_full_leaves_no_trace() {
        let f = fixture(100.0, 1);
        f.gateway.submit(task_request("acme", 0)).await.unwrap();
        let err = f
            .gateway
            .submit(task_request("acme", 0).with_idempotency_key("k"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::QueueFull(_)));
        assert_eq!(f.mailbox.len(), 1);
        assert!((f.ledger.consumed("acme") - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_validation_and_missing_tenant() {
        let f = fixture(100.0, 10);
        let mut empty = task_request("acme", 0);
        empty.payload = JobPayload::Task(TaskPayload {
            text: "   ".into(),
            platforms: Vec::new(),
            tags: Vec::new(),
        });
        assert!(matches!(
            f.gateway.submit(empty).await,
            Err(AdmissionError::Validation(_))
        ));
        assert_eq!(
            f.gateway.submit(task_request(" ", 0)).await,
            Err(AdmissionError::MissingTenant)
        );
    }

    #[tokio::test]
    async fn test_unlisted_platform_and_variant_rejected() {
        let f = fixture(100.0, 10);
        let mut request = task_request("acme", 1);
        request.payload = JobPayload::Task(TaskPayload {
            text: "hello".into(),
            platforms: vec!["x".into(), "myspace".into()],
            tags: Vec::new(),
        });
        let err = f.gateway.submit(request).await.unwrap_err();
        assert_eq!(
            err,
            AdmissionError::Validation("unsupported platform `myspace`".into())
        );

        let request = SubmitRequest::new(
            "acme",
            JobPayload::Competition(CompetitionPayload {
                task: TaskPayload {
                    text: "hello".into(),
                    platforms: vec!["x".into()],
                    tags: Vec::new(),
                },
                competitors: Some(vec!["v1".into(), "rogue".into()]),
            }),
        );
        let err = f.gateway.submit(request).await.unwrap_err();
        assert_eq!(err, AdmissionError::Validation("unknown variant `rogue`".into()));
        assert!(f.tasks.is_empty());
        assert!(f.competitions.is_empty());
        assert!(f.ledger.consumed("acme").abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_key_reused_across_kinds_conflicts() {
        let f = fixture(100.0, 10);
        f.gateway
            .submit(task_request("acme", 1).with_idempotency_key("k1"))
            .await
            .unwrap();

        let competition = SubmitRequest::new(
            "acme",
            JobPayload::Competition(CompetitionPayload {
                task: TaskPayload {
                    text: "Great launch today".into(),
                    platforms: vec!["x".into()],
                    tags: Vec::new(),
                },
                competitors: None,
            }),
        )
        .with_idempotency_key("k1");
        let err = f.gateway.submit(competition).await.unwrap_err();
        assert_eq!(err, AdmissionError::IdempotencyConflict { key: "k1".into() });
        assert_eq!(err.reason(), "idempotency_conflict");
        assert_eq!(f.tasks.len(), 1);
        assert!(f.competitions.is_empty());
    }
}
