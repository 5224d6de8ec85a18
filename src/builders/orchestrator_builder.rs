//! Assemble an [`Orchestrator`] from configuration and collaborators.
//!
//! Anything not supplied falls back to the in-process stubs, the random
//! scorer, and the configured cost estimator and feature flags.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::OrchestratorConfig;
use crate::core::tournament::win_rate_delta_from_config;
use crate::core::usage::spawn_usage_drain;
use crate::core::{
    AdmissionGateway, AdmissionParts, ArenaExecutor, BreakerRegistry, Collaborators,
    ConfiguredCostEstimator, ContentGenerator, CostEstimator, CostLedger, ErrorBudget,
    ExecutorParts, FeatureFlagStore, FitnessScorer, IdempotencyStore, InMemoryFeatureGate,
    InMemoryUsageSink, JobExecutor, JobKind, JobQueue, PipelineSync, PoolError, Publisher,
    RandomScorer, ResultMailbox, UsageReporter, UsageSink, WorkerPool,
};
use crate::core::worker_pool::PoolParts;
use crate::infra::{LoggingPipelineSync, StubContentGenerator, StubPublisher};
use crate::runtime::orchestrator::{Orchestrator, OrchestratorParts};

/// Errors raised while building the orchestrator.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A worker pool could not start.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    content: Option<Arc<dyn ContentGenerator>>,
    publisher: Option<Arc<dyn Publisher>>,
    pipeline: Option<Arc<dyn PipelineSync>>,
    scorer: Option<Arc<dyn FitnessScorer>>,
    estimator: Option<Arc<dyn CostEstimator>>,
    features: Option<Arc<dyn FeatureFlagStore>>,
    executor: Option<Arc<dyn JobExecutor>>,
}

impl OrchestratorBuilder {
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            content: None,
            publisher: None,
            pipeline: None,
            scorer: None,
            estimator: None,
            features: None,
            executor: None,
        }
    }

    /// Content collaborator.
    #[must_use]
    pub fn with_content_generator(mut self, content: Arc<dyn ContentGenerator>) -> Self {
        self.content = Some(content);
        self
    }

    /// Publishing collaborator.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Evolution pipeline.
    #[must_use]
    pub fn with_pipeline_sync(mut self, pipeline: Arc<dyn PipelineSync>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Variant scorer.
    #[must_use]
    pub fn with_scorer(mut self, scorer: Arc<dyn FitnessScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Cost estimator.
    #[must_use]
    pub fn with_cost_estimator(mut self, estimator: Arc<dyn CostEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Feature flag store.
    #[must_use]
    pub fn with_feature_store(mut self, features: Arc<dyn FeatureFlagStore>) -> Self {
        self.features = Some(features);
        self
    }

    /// Replace the job executor used by both pools.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn JobExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Validate the configuration, start both worker pools and the usage
    /// drain. Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`BuildError`] on invalid configuration.
    pub fn build(self) -> Result<Orchestrator, BuildError> {
        let cfg = self.config;
        cfg.validate().map_err(BuildError::InvalidConfig)?;

        let estimator = self
            .estimator
            .unwrap_or_else(|| Arc::new(ConfiguredCostEstimator::new(&cfg.cost)));
        let features = self
            .features
            .unwrap_or_else(|| Arc::new(InMemoryFeatureGate::new(&cfg.features)));
        let ledger = Arc::new(CostLedger::new(&cfg.cost));
        let budget = Arc::new(ErrorBudget::new(&cfg.error_budget));
        let breakers = Arc::new(BreakerRegistry::new());
        let mailbox = Arc::new(ResultMailbox::new(cfg.max_retained_jobs));
        let idempotency = Arc::new(IdempotencyStore::new(Duration::from_secs(
            cfg.idempotency.ttl_secs,
        )));
        let task_queue = Arc::new(JobQueue::new(JobKind::Task, cfg.task_pool.max_queue_depth));
        let competition_queue = Arc::new(JobQueue::new(
            JobKind::Competition,
            cfg.competition_pool.max_queue_depth,
        ));

        let usage_sink = Arc::new(InMemoryUsageSink::new(cfg.usage.max_events));
        let (usage, usage_rx) = UsageReporter::channel(cfg.usage.channel_capacity);
        let drain = spawn_usage_drain(usage_rx, Arc::clone(&usage_sink) as Arc<dyn UsageSink>);

        let executor = match self.executor {
            Some(executor) => executor,
            None => {
                let collaborators = Collaborators {
                    content: self
                        .content
                        .unwrap_or_else(|| Arc::new(StubContentGenerator::new())),
                    publisher: self
                        .publisher
                        .unwrap_or_else(|| Arc::new(StubPublisher::default())),
                    pipeline: self
                        .pipeline
                        .unwrap_or_else(|| Arc::new(LoggingPipelineSync::new())),
                };
                let parts = ExecutorParts {
                    collaborators,
                    breakers: Arc::clone(&breakers),
                    estimator: Arc::clone(&estimator),
                    scorer: self.scorer.unwrap_or_else(|| Arc::new(RandomScorer)),
                    win_rate: win_rate_delta_from_config(&cfg.tournament.win_rate_delta),
                    features: Arc::clone(&features),
                    budget: Arc::clone(&budget),
                };
                Arc::new(ArenaExecutor::new(parts, &cfg.breakers, &cfg.tournament))
                    as Arc<dyn JobExecutor>
            }
        };

        let gateway = Arc::new(AdmissionGateway::new(AdmissionParts {
            idempotency: Arc::clone(&idempotency),
            estimator,
            ledger: Arc::clone(&ledger),
            budget: Arc::clone(&budget),
            features: Arc::clone(&features),
            task_queue: Arc::clone(&task_queue),
            competition_queue: Arc::clone(&competition_queue),
            mailbox: Arc::clone(&mailbox),
            usage,
            default_competitors: cfg.tournament.competitors.len(),
            allowed_platforms: cfg.allowed_platforms.iter().cloned().collect(),
            known_variants: cfg.tournament.known_variants(),
        }));

        let pool_parts = |queue: &Arc<JobQueue>| PoolParts {
            queue: Arc::clone(queue),
            executor: Arc::clone(&executor),
            mailbox: Arc::clone(&mailbox),
            budget: Arc::clone(&budget),
        };
        let task_pool = WorkerPool::start(cfg.task_pool.clone(), pool_parts(&task_queue))?;
        let competition_pool =
            WorkerPool::start(cfg.competition_pool.clone(), pool_parts(&competition_queue))?;

        Ok(Orchestrator::from_parts(OrchestratorParts {
            config: cfg,
            gateway,
            mailbox,
            budget,
            ledger,
            features,
            breakers,
            idempotency,
            usage_sink,
            task_pool,
            competition_pool,
            background: vec![drain],
        }))
    }
}
