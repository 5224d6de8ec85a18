//! Submission data model: job kinds, priorities, payloads, acceptance.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::AdmissionError;

/// Server-generated submission identifier.
pub type SubmissionId = Uuid;

const MAX_TEXT_LEN: usize = 10_000;
const MAX_PLATFORMS: usize = 8;
const MAX_TAGS: usize = 32;
const MAX_COMPETITORS: usize = 16;

/// The two job kinds the orchestrator schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// A single task execution.
    Task,
    /// A multi-variant self-compete tournament.
    Competition,
}

impl JobKind {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Competition => "competition",
        }
    }

    /// Feature flag gating admission of this kind.
    #[must_use]
    pub fn feature_flag(self) -> String {
        format!("{}-v2", self.as_str())
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Four-level scheduling priority; lower numeric value runs first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Value 1.
    Urgent,
    /// Value 2.
    High,
    /// Value 3.
    #[default]
    Normal,
    /// Value 4.
    Low,
}

impl Priority {
    /// Numeric queue priority (`urgent = 1` … `low = 4`).
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::Urgent => 1,
            Self::High => 2,
            Self::Normal => 3,
            Self::Low => 4,
        }
    }
}

/// Payload of a single task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Source text handed to the content collaborator.
    pub text: String,
    /// Platforms to publish to; may be empty.
    #[serde(default)]
    pub platforms: Vec<String>,
    /// Free-form tags echoed in the result.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TaskPayload {
    /// Check shape constraints.
    pub fn validate(&self) -> Result<(), AdmissionError> {
        if self.text.trim().is_empty() {
            return Err(AdmissionError::Validation("text must not be empty".into()));
        }
        if self.text.len() > MAX_TEXT_LEN {
            return Err(AdmissionError::Validation(format!(
                "text exceeds {MAX_TEXT_LEN} bytes"
            )));
        }
        validate_names("platforms", &self.platforms, MAX_PLATFORMS)?;
        if self.tags.len() > MAX_TAGS {
            return Err(AdmissionError::Validation(format!(
                "at most {MAX_TAGS} tags are allowed"
            )));
        }
        Ok(())
    }
}

/// Payload of a self-compete tournament.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitionPayload {
    /// Task every variant performs.
    #[serde(flatten)]
    pub task: TaskPayload,
    /// Variant names; the configured defaults are used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competitors: Option<Vec<String>>,
}

impl CompetitionPayload {
    /// Check shape constraints.
    pub fn validate(&self) -> Result<(), AdmissionError> {
        self.task.validate()?;
        if let Some(competitors) = &self.competitors {
            if competitors.is_empty() {
                return Err(AdmissionError::Validation(
                    "competitors must not be empty when supplied".into(),
                ));
            }
            validate_names("competitors", competitors, MAX_COMPETITORS)?;
        }
        Ok(())
    }
}

fn validate_names(field: &str, names: &[String], max: usize) -> Result<(), AdmissionError> {
    if names.len() > max {
        return Err(AdmissionError::Validation(format!(
            "at most {max} {field} are allowed"
        )));
    }
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if name.trim().is_empty() {
            return Err(AdmissionError::Validation(format!(
                "{field} entries must not be empty"
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(AdmissionError::Validation(format!(
                "duplicate entry `{name}` in {field}"
            )));
        }
    }
    Ok(())
}

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Task payload.
    Task(TaskPayload),
    /// Competition payload.
    Competition(CompetitionPayload),
}

impl JobPayload {
    /// Kind of this payload.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        match self {
            Self::Task(_) => JobKind::Task,
            Self::Competition(_) => JobKind::Competition,
        }
    }

    /// Check shape constraints.
    pub fn validate(&self) -> Result<(), AdmissionError> {
        match self {
            Self::Task(task) => task.validate(),
            Self::Competition(competition) => competition.validate(),
        }
    }

    /// Tags carried by the payload.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        match self {
            Self::Task(task) => &task.tags,
            Self::Competition(competition) => &competition.task.tags,
        }
    }
}

/// A request entering the admission gateway.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Resolved tenant identifier.
    pub tenant_id: String,
    /// Kind-specific payload.
    pub payload: JobPayload,
    /// Optional client-supplied deduplication key.
    pub idempotency_key: Option<String>,
    /// Scheduling priority.
    pub priority: Priority,
    /// Origin of the request, carried on usage events.
    pub source: String,
}

impl SubmitRequest {
    /// Build a request with normal priority and no idempotency key.
    pub fn new(tenant_id: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            payload,
            idempotency_key: None,
            priority: Priority::Normal,
            source: "api".into(),
        }
    }

    /// Attach an idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the usage-event source label.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Kind of the payload.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        self.payload.kind()
    }
}

/// An admitted submission; immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    /// Unique identifier.
    pub id: SubmissionId,
    /// Owning tenant.
    pub tenant_id: String,
    /// Kind-specific payload.
    pub payload: JobPayload,
    /// Client deduplication key, if any.
    pub idempotency_key: Option<String>,
    /// Scheduling priority.
    pub priority: Priority,
    /// Admission time in milliseconds since epoch.
    pub created_at_ms: u128,
}

impl Submission {
    /// Kind of the payload.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        self.payload.kind()
    }
}

/// Status reported on acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptanceStatus {
    /// The submission was enqueued.
    Accepted,
}

/// Successful admission outcome, replayed verbatim for idempotent retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    /// Submission identifier.
    pub id: SubmissionId,
    /// Kind of the accepted job.
    pub kind: JobKind,
    /// Always `accepted`.
    pub status: AcceptanceStatus,
}

impl Accepted {
    /// Acceptance for a freshly enqueued submission.
    #[must_use]
    pub const fn new(id: SubmissionId, kind: JobKind) -> Self {
        Self {
            id,
            kind,
            status: AcceptanceStatus::Accepted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(text: &str, platforms: &[&str]) -> TaskPayload {
        TaskPayload {
            text: text.into(),
            platforms: platforms.iter().map(|p| (*p).to_string()).collect(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_priority_values() {
        assert_eq!(Priority::Urgent.value(), 1);
        assert_eq!(Priority::High.value(), 2);
        assert_eq!(Priority::Normal.value(), 3);
        assert_eq!(Priority::Low.value(), 4);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_feature_flag_names() {
        assert_eq!(JobKind::Task.feature_flag(), "task-v2");
        assert_eq!(JobKind::Competition.feature_flag(), "competition-v2");
    }

    #[test]
    fn test_empty_text_rejected() {
        let err = task("   ", &[]).validate().unwrap_err();
        assert!(matches!(err, AdmissionError::Validation(_)));
    }

    #[test]
    fn test_duplicate_platform_rejected() {
        assert!(task("hello", &["x", "x"]).validate().is_err());
        assert!(task("hello", &["x", "linkedin"]).validate().is_ok());
    }

    #[test]
    fn test_competition_requires_non_empty_competitors() {
        let payload = CompetitionPayload {
            task: task("hello", &[]),
            competitors: Some(Vec::new()),
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_competition_payload_flattens_task_fields() {
        let json = r#"{"text":"launch","platforms":["x"],"competitors":["a","b"]}"#;
        let payload: CompetitionPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.task.text, "launch");
        assert_eq!(payload.competitors.as_deref().map(<[String]>::len), Some(2));
    }
}
