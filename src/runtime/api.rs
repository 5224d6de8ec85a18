//! Versioned HTTP API.
//!
//! ## Routes
//!
//! - `POST /v1/tasks` - submit a task
//! - `GET /v1/tasks/:id` - task status and result
//! - `POST /v1/self-compete` - submit a tournament
//! - `GET /v1/self-compete/:id` - tournament status and champion
//! - `GET /v1/stats` - pool, budget, and breaker statistics
//! - `GET /v1/metrics` - Prometheus text exposition
//! - `GET /v1/health` - liveness
//!
//! The tenant arrives resolved in `X-Tenant-ID`; `Idempotency-Key` is optional.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::HeaderName;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::core::{
    AcceptanceStatus, AdmissionError, Champion, CompetitionPayload, JobKind, JobOutput,
    JobPayload, JobRecord, JobStatus, Priority, SubmitRequest, TaskPayload,
};
use crate::runtime::orchestrator::{Orchestrator, OrchestratorStats};
use crate::util::metrics::{prometheus_handle, record_burn_rate};

/// Header carrying the resolved tenant.
pub const TENANT_HEADER: &str = "x-tenant-id";
/// Header carrying the client deduplication key.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

const BUDGET_RETRY_AFTER_SECS: u64 = 30;
const QUEUE_RETRY_AFTER_SECS: u64 = 1;

/// Shared handler state.
pub type AppState = Arc<Orchestrator>;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Errors
// ============================================================================

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Error category.
    pub error: String,
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// HTTP error with a stable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    error: &'static str,
    message: String,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            error,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// 400 for malformed input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "validation", message)
    }

    /// 404 for unknown resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", "not_found", message)
    }

    /// Attach a `Retry-After` header.
    #[must_use]
    pub const fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl From<AdmissionError> for ApiError {
    fn from(value: AdmissionError) -> Self {
        let reason = value.reason();
        let message = value.to_string();
        match value {
            AdmissionError::Validation(_) => Self::bad_request(message),
            AdmissionError::MissingTenant => {
                Self::new(StatusCode::BAD_REQUEST, "MISSING_TENANT", reason, message)
            }
            AdmissionError::MarginExceeded { .. } => {
                Self::new(StatusCode::PAYMENT_REQUIRED, "MARGIN_EXCEEDED", reason, message)
            }
            AdmissionError::BudgetExhausted { .. } => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "BUDGET_EXHAUSTED", reason, message)
                    .with_retry_after(BUDGET_RETRY_AFTER_SECS)
            }
            AdmissionError::FeatureDisabled { .. } => {
                Self::new(StatusCode::NOT_FOUND, "FEATURE_DISABLED", reason, message)
            }
            AdmissionError::QueueFull(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "QUEUE_FULL", reason, message)
                    .with_retry_after(QUEUE_RETRY_AFTER_SECS)
            }
            AdmissionError::IdempotencyConflict { .. } => {
                Self::new(StatusCode::CONFLICT, "IDEMPOTENCY_CONFLICT", reason, message)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        Self::bad_request(value.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ApiErrorBody {
                error: self.error.to_string(),
                code: self.code.to_string(),
                message: self.message,
            }),
        )
            .into_response();

        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("retry-after"), value);
            }
        }
        response
    }
}

// ============================================================================
// Request / Response Models
// ============================================================================

/// Body of `POST /v1/tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Task payload.
    #[serde(flatten)]
    pub task: TaskPayload,
    /// Scheduling priority; `normal` when absent.
    #[serde(default)]
    pub priority: Priority,
}

/// Body of `POST /v1/self-compete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitionRequest {
    /// Competition payload.
    #[serde(flatten)]
    pub competition: CompetitionPayload,
    /// Scheduling priority; `normal` when absent.
    #[serde(default)]
    pub priority: Priority,
}

/// Response of `POST /v1/tasks`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAccepted {
    /// Task identifier.
    pub task_id: Uuid,
    /// Always `accepted`.
    pub status: AcceptanceStatus,
}

/// Response of `POST /v1/self-compete`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionAccepted {
    /// Competition identifier.
    pub competition_id: Uuid,
    /// Always `accepted`.
    pub status: AcceptanceStatus,
}

/// Response of `GET /v1/tasks/:id`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusResponse {
    /// Task identifier.
    pub id: Uuid,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Output once completed.
    pub result: Option<JobOutput>,
    /// Cost once completed.
    pub cost: Option<f64>,
    /// Payload tags.
    pub tags: Vec<String>,
    /// Delivery attempts.
    pub attempts: u32,
    /// Last error.
    pub error: Option<String>,
}

/// Response of `GET /v1/self-compete/:id`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionStatusResponse {
    /// Competition identifier.
    pub id: Uuid,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Champion once completed.
    pub champion: Option<Champion>,
    /// Aggregate cost once completed.
    pub cost: Option<f64>,
    /// Payload tags.
    pub tags: Vec<String>,
    /// Delivery attempts.
    pub attempts: u32,
    /// Last error.
    pub error: Option<String>,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
}

// ============================================================================
// Router
// ============================================================================

/// Build the `/v1` router.
pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/tasks", post(submit_task))
        .route("/tasks/:id", get(task_status))
        .route("/self-compete", post(submit_competition))
        .route("/self-compete/:id", get(competition_status))
        .route("/stats", get(stats))
        .route("/metrics", get(serve_metrics))
        .route("/health", get(health));

    Router::new()
        .nest("/v1", v1)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn submit_request(headers: &HeaderMap, payload: JobPayload, priority: Priority) -> SubmitRequest {
    let tenant = header_str(headers, TENANT_HEADER).unwrap_or_default();
    let mut request = SubmitRequest::new(tenant, payload)
        .with_priority(priority)
        .with_source("http");
    if let Some(key) = header_str(headers, IDEMPOTENCY_HEADER).filter(|k| !k.is_empty()) {
        request = request.with_idempotency_key(key);
    }
    request
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
}

fn lookup(state: &Orchestrator, id: &str, kind: JobKind) -> ApiResult<JobRecord> {
    let id = Uuid::parse_str(id).map_err(|_| ApiError::bad_request(format!("invalid id `{id}`")))?;
    state
        .status(id)
        .filter(|record| record.kind == kind)
        .ok_or_else(|| ApiError::not_found(format!("{kind} {id} not found")))
}

async fn submit_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<TaskRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let request = submit_request(&headers, JobPayload::Task(body.task), body.priority);
    let accepted = state.submit(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            task_id: accepted.id,
            status: accepted.status,
        }),
    ))
}

async fn task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskStatusResponse>> {
    let record = lookup(&state, &id, JobKind::Task)?;
    Ok(Json(TaskStatusResponse {
        id: record.id,
        status: record.status,
        result: record.result,
        cost: record.cost,
        tags: record.tags,
        attempts: record.attempts,
        error: record.error,
    }))
}

async fn submit_competition(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CompetitionRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let request = submit_request(
        &headers,
        JobPayload::Competition(body.competition),
        body.priority,
    );
    let accepted = state.submit(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CompetitionAccepted {
            competition_id: accepted.id,
            status: accepted.status,
        }),
    ))
}

async fn competition_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CompetitionStatusResponse>> {
    let record = lookup(&state, &id, JobKind::Competition)?;
    let champion = match record.result {
        Some(JobOutput::Competition(outcome)) => Some(outcome.champion),
        _ => None,
    };
    Ok(Json(CompetitionStatusResponse {
        id: record.id,
        status: record.status,
        champion,
        cost: record.cost,
        tags: record.tags,
        attempts: record.attempts,
        error: record.error,
    }))
}

async fn stats(State(state): State<AppState>) -> Json<OrchestratorStats> {
    Json(state.stats())
}

async fn serve_metrics(State(state): State<AppState>) -> impl IntoResponse {
    record_burn_rate(state.error_budget().burn_rate());
    prometheus_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain; charset=utf-8")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn health() -> Json<Health> {
    Json(Health { ok: true })
}
