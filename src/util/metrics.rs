//! Prometheus metrics for admission, execution, and collaborator calls.
//!
//! Metrics go through the `metrics` facade. [`init_metrics`] installs the
//! Prometheus recorder once per process and the `/metrics` endpoint renders
//! from the returned handle.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// ============================================================================
// Metric Names
// ============================================================================

/// Accepted submissions by kind and tenant.
pub const JOBS_SUBMITTED: &str = "arena_jobs_submitted_total";

/// Terminal job outcomes by kind, tenant, and outcome.
pub const JOBS_COMPLETED: &str = "arena_jobs_completed_total";

/// Job execution duration histogram (seconds, per attempt).
pub const JOB_DURATION: &str = "arena_job_duration_seconds";

/// Aggregate cost per finished competition.
pub const COMPETITION_COST: &str = "arena_competition_cost";

/// Current global error-budget burn rate.
pub const BUDGET_BURN_RATE: &str = "arena_error_budget_burn_rate";

/// Admission rejections by reason.
pub const ADMISSION_REJECTIONS: &str = "arena_admission_rejections_total";

/// Calls answered by a breaker fallback instead of the collaborator.
pub const BREAKER_SHORT_CIRCUITS: &str = "arena_breaker_short_circuits_total";

/// Champion promotions applied to the feature gate.
pub const CHAMPION_PROMOTIONS: &str = "arena_champion_promotions_total";

// ============================================================================
// Prometheus Recorder
// ============================================================================

static PROMETHEUS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Installs the global Prometheus recorder and registers metric descriptions.
///
/// Safe to call multiple times; subsequent calls return the first handle.
/// Returns `None` when another recorder was already installed by the host
/// process, in which case metrics still flow to that recorder.
pub fn init_metrics() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                register_metrics();
                tracing::info!("Prometheus metrics recorder initialized");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install prometheus recorder");
                None
            }
        })
        .clone()
}

/// Returns the global Prometheus handle, if initialized.
#[must_use]
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned().flatten()
}

/// Registers all metric descriptions.
pub fn register_metrics() {
    describe_counter!(JOBS_SUBMITTED, "Total accepted submissions");
    describe_counter!(JOBS_COMPLETED, "Total jobs reaching a terminal state");
    describe_histogram!(JOB_DURATION, "Duration of job execution attempts in seconds");
    describe_histogram!(COMPETITION_COST, "Aggregate cost of finished competitions");
    describe_gauge!(BUDGET_BURN_RATE, "Error-budget burn rate over the sliding window");
    describe_counter!(ADMISSION_REJECTIONS, "Total rejected admissions");
    describe_counter!(BREAKER_SHORT_CIRCUITS, "Total calls short-circuited by a breaker");
    describe_counter!(CHAMPION_PROMOTIONS, "Total champion rollout promotions");
}

// ============================================================================
// Recording
// ============================================================================

/// Records an accepted submission.
pub fn record_submission(kind: &str, tenant: &str) {
    let labels = [("kind", kind.to_string()), ("tenant", tenant.to_string())];
    counter!(JOBS_SUBMITTED, &labels).increment(1);
}

/// Records a rejected admission.
pub fn record_rejection(reason: &'static str) {
    counter!(ADMISSION_REJECTIONS, "reason" => reason).increment(1);
}

/// Records a terminal job outcome.
pub fn record_job_outcome(kind: &str, tenant: &str, outcome: &str) {
    let labels = [
        ("kind", kind.to_string()),
        ("tenant", tenant.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(JOBS_COMPLETED, &labels).increment(1);
}

/// Records the duration of one execution attempt.
pub fn record_job_duration(kind: &str, duration_secs: f64) {
    histogram!(JOB_DURATION, "kind" => kind.to_string()).record(duration_secs);
}

/// Records the aggregate cost of a finished competition.
pub fn record_competition_cost(cost: f64) {
    histogram!(COMPETITION_COST).record(cost);
}

/// Publishes the current burn rate.
pub fn record_burn_rate(burn_rate: f64) {
    gauge!(BUDGET_BURN_RATE).set(burn_rate);
}

/// Records a breaker short-circuit for a target.
pub fn record_short_circuit(target: &str) {
    counter!(BREAKER_SHORT_CIRCUITS, "target" => target.to_string()).increment(1);
}

/// Records a champion promotion.
pub fn record_promotion(variant: &str) {
    counter!(CHAMPION_PROMOTIONS, "variant" => variant.to_string()).increment(1);
}
