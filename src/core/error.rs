//! Error types for admission, scheduling, and execution.

use thiserror::Error;

/// Reasons a submission is refused before it reaches a queue.
///
/// Every variant maps to a distinct HTTP status on the API surface.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdmissionError {
    /// Malformed payload; rejected before any gate runs.
    #[error("validation failed: {0}")]
    Validation(String),
    /// No tenant identifier was supplied.
    #[error("tenant identifier is required")]
    MissingTenant,
    /// Forecast spend would drive the tenant's remaining margin negative.
    #[error("margin exceeded for tenant `{tenant}`: forecast {forecast:.2}, remaining {remaining:.2}")]
    MarginExceeded {
        /// Tenant whose margin would be breached.
        tenant: String,
        /// Forecast cost of the submission.
        forecast: f64,
        /// Margin left before this submission.
        remaining: f64,
    },
    /// The global error budget is spent.
    #[error("error budget exhausted (burn rate {burn_rate:.2})")]
    BudgetExhausted {
        /// Burn rate observed at admission time.
        burn_rate: f64,
    },
    /// The tenant is not enrolled in the job kind's rollout.
    #[error("feature `{flag}` is not enabled for tenant `{tenant}`")]
    FeatureDisabled {
        /// Flag that was checked.
        flag: String,
        /// Tenant that was checked.
        tenant: String,
    },
    /// The target queue refused the job.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// The idempotency key is live for a different request.
    #[error("idempotency key `{key}` was already used for a different request")]
    IdempotencyConflict {
        /// Reused key.
        key: String,
    },
}

impl AdmissionError {
    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::MissingTenant => "missing_tenant",
            Self::MarginExceeded { .. } => "margin_exceeded",
            Self::BudgetExhausted { .. } => "budget_exhausted",
            Self::FeatureDisabled { .. } => "feature_disabled",
            Self::QueueFull(_) => "queue_full",
            Self::IdempotencyConflict { .. } => "idempotency_conflict",
        }
    }
}

/// Failures reported by (or on behalf of) an external collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The collaborator could not be reached or returned an error.
    #[error("{target} unavailable: {message}")]
    Unavailable {
        /// Breaker target name.
        target: String,
        /// Error detail.
        message: String,
    },
    /// The call exceeded the breaker's per-call timeout.
    #[error("{target} timed out after {after_ms}ms")]
    Timeout {
        /// Breaker target name.
        target: String,
        /// Timeout that elapsed.
        after_ms: u64,
    },
    /// The breaker short-circuited the call.
    #[error("circuit open for {target}")]
    CircuitOpen {
        /// Breaker target name.
        target: String,
    },
    /// The collaborator refused the request.
    #[error("{target} rejected request: {message}")]
    Rejected {
        /// Breaker target name.
        target: String,
        /// Error detail.
        message: String,
    },
}

/// Errors produced while executing a dequeued job.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    /// A collaborator call failed; the job may be retried.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    /// Every variant of a competition failed.
    #[error("no competitors completed ({attempted} attempted)")]
    NoCompetitorsCompleted {
        /// Number of variants raced.
        attempted: usize,
    },
    /// The job failed on every delivery attempt.
    #[error("delivery exhausted after {attempts} attempts: {last_error}")]
    QueueDeliveryExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last_error: String,
    },
    /// The executor panicked; treated as non-retryable.
    #[error("executor panicked")]
    Panicked,
}

impl ExecutionError {
    /// Whether the queue should schedule another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Collaborator(_))
    }
}

/// Errors produced by queue operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// Queue is full for the target kind.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// Queue has been closed for shutdown.
    #[error("queue closed")]
    Closed,
}

impl From<SchedulerError> for AdmissionError {
    fn from(value: SchedulerError) -> Self {
        match value {
            SchedulerError::QueueFull(msg) => Self::QueueFull(msg),
            SchedulerError::Closed => Self::QueueFull("queue closed".into()),
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
