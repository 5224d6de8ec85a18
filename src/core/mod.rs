//! Admission, scheduling, execution, and tournament logic.

pub mod admission;
pub mod circuit_breaker;
pub mod collaborators;
pub mod cost;
pub mod error;
pub mod error_budget;
pub mod executor;
pub mod feature_gate;
pub mod idempotency;
pub mod mailbox;
pub mod queue;
pub mod submission;
pub mod tournament;
pub mod usage;
pub mod worker_pool;

pub use admission::{AdmissionGateway, AdmissionParts};
pub use circuit_breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitSnapshot, CircuitState};
pub use collaborators::{
    ContentGenerator, ContentSignal, EvolutionEvent, PipelineSync, Publisher, ShareOutcome,
    ShareReceipt,
};
pub use cost::{ConfiguredCostEstimator, CostEstimator, CostForecast, CostLedger};
pub use error::{AdmissionError, AppResult, CollaboratorError, ExecutionError, SchedulerError};
pub use error_budget::ErrorBudget;
pub use executor::{
    ArenaExecutor, Collaborators, CompetitionOutcome, ExecutorParts, JobExecutor, JobOutput,
    TaskOutcome,
};
pub use feature_gate::{FeatureFlagStore, InMemoryFeatureGate};
pub use idempotency::{Claim, ClaimGuard, IdempotencyRecord, IdempotencyStore};
pub use mailbox::{JobRecord, JobStatus, ResultMailbox};
pub use queue::{backoff_delay, Job, JobQueue};
pub use submission::{
    AcceptanceStatus, Accepted, CompetitionPayload, JobKind, JobPayload, Priority, Submission,
    SubmissionId, SubmitRequest, TaskPayload,
};
pub use tournament::{
    select_champion, Champion, EvolutionPolicy, FitnessScorer, FixedDelta, FixedScorer,
    RandomScorer, RunnerUpMargin, Variant, WinRateDelta,
};
pub use usage::{InMemoryUsageSink, UsageEvent, UsageReporter, UsageSink};
pub use worker_pool::{PoolError, PoolStats, WorkerPool};
