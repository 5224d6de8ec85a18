//! Result mailbox: job status and results for the status endpoints.
//!
//! Retention is bounded. When full, the oldest finished record is evicted
//! first; if every record is still in flight, the oldest record goes.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::executor::JobOutput;
use crate::core::{JobKind, Submission, SubmissionId};
use crate::util::clock::now_ms;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Waiting in the queue.
    Queued,
    /// A worker is executing it.
    Running,
    /// Waiting for a retry backoff.
    Retrying,
    /// Finished successfully.
    Completed,
    /// Failed with a non-retryable error.
    Failed,
    /// Failed on every delivery attempt.
    FailedExhausted,
}

impl JobStatus {
    /// Whether no further transitions happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::FailedExhausted)
    }

    /// Stable label used for metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::FailedExhausted => "failed-exhausted",
        }
    }
}

/// Stored view of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Submission identifier.
    pub id: SubmissionId,
    /// Job kind.
    pub kind: JobKind,
    /// Owning tenant.
    pub tenant_id: String,
    /// Current state.
    pub status: JobStatus,
    /// Delivery attempts made.
    pub attempts: u32,
    /// Output once completed.
    pub result: Option<JobOutput>,
    /// Last error, if any.
    pub error: Option<String>,
    /// Payload tags.
    pub tags: Vec<String>,
    /// Actual cost once completed.
    pub cost: Option<f64>,
    /// Admission time (ms since epoch).
    pub created_at_ms: u128,
    /// Last transition time (ms since epoch).
    pub updated_at_ms: u128,
}

struct Inner {
    records: HashMap<SubmissionId, JobRecord>,
    order: VecDeque<SubmissionId>,
}

/// Bounded in-memory job record store.
pub struct ResultMailbox {
    max_retained: usize,
    inner: RwLock<Inner>,
}

impl ResultMailbox {
    /// Store retaining at most `max_retained` records.
    #[must_use]
    pub fn new(max_retained: usize) -> Self {
        Self {
            max_retained: max_retained.max(1),
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Record a freshly enqueued submission.
    pub fn insert_queued(&self, submission: &Submission) {
        let now = now_ms();
        let record = JobRecord {
            id: submission.id,
            kind: submission.kind(),
            tenant_id: submission.tenant_id.clone(),
            status: JobStatus::Queued,
            attempts: 0,
            result: None,
            error: None,
            tags: submission.payload.tags().to_vec(),
            cost: None,
            created_at_ms: submission.created_at_ms,
            updated_at_ms: now,
        };

        let mut inner = self.inner.write();
        if inner.records.insert(submission.id, record).is_none() {
            inner.order.push_back(submission.id);
        }
        while inner.records.len() > self.max_retained {
            let victim = inner
                .order
                .iter()
                .position(|id| {
                    inner
                        .records
                        .get(id)
                        .is_some_and(|r| r.status.is_terminal())
                })
                .unwrap_or(0);
            if let Some(id) = inner.order.remove(victim) {
                inner.records.remove(&id);
                tracing::trace!(job_id = %id, "evicted job record");
            }
        }
    }

    /// Remove a record, e.g. when the enqueue it was written for failed.
    pub fn remove(&self, id: SubmissionId) -> Option<JobRecord> {
        let mut inner = self.inner.write();
        let record = inner.records.remove(&id)?;
        inner.order.retain(|existing| *existing != id);
        Some(record)
    }

    fn update(&self, id: SubmissionId, apply: impl FnOnce(&mut JobRecord)) {
        let mut inner = self.inner.write();
        if let Some(record) = inner.records.get_mut(&id) {
            apply(record);
            record.updated_at_ms = now_ms();
        }
    }

    /// A worker picked the job up.
    pub fn mark_running(&self, id: SubmissionId, attempts: u32) {
        self.update(id, |r| {
            r.status = JobStatus::Running;
            r.attempts = attempts;
        });
    }

    /// The attempt failed and a retry is scheduled.
    pub fn mark_retrying(&self, id: SubmissionId, attempts: u32, error: String) {
        self.update(id, |r| {
            r.status = JobStatus::Retrying;
            r.attempts = attempts;
            r.error = Some(error);
        });
    }

    /// The job completed.
    pub fn complete(&self, id: SubmissionId, attempts: u32, output: JobOutput) {
        self.update(id, |r| {
            r.status = JobStatus::Completed;
            r.attempts = attempts;
            r.cost = Some(output.cost());
            r.result = Some(output);
            r.error = None;
        });
    }

    /// The job reached a failed terminal state.
    pub fn fail(&self, id: SubmissionId, status: JobStatus, attempts: u32, error: String) {
        debug_assert!(matches!(status, JobStatus::Failed | JobStatus::FailedExhausted));
        self.update(id, |r| {
            r.status = status;
            r.attempts = attempts;
            r.error = Some(error);
        });
    }

    /// Snapshot of a record.
    #[must_use]
    pub fn get(&self, id: SubmissionId) -> Option<JobRecord> {
        self.inner.read().records.get(&id).cloned()
    }

    /// Number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
