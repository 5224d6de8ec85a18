//! Shared helpers and collaborator doubles for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use prometheus_arena::config::OrchestratorConfig;
use prometheus_arena::core::{
    CollaboratorError, CompetitionPayload, ContentGenerator, ContentSignal, EvolutionEvent,
    ExecutionError, Job, JobExecutor, JobOutput, JobPayload, JobRecord, PipelineSync, Priority,
    SubmissionId, TaskOutcome, TaskPayload,
};
use prometheus_arena::runtime::Orchestrator;

// ============================================================================
// Payloads and configuration
// ============================================================================

pub fn task(text: &str, platforms: &[&str]) -> TaskPayload {
    TaskPayload {
        text: text.into(),
        platforms: platforms.iter().map(|p| (*p).to_string()).collect(),
        tags: vec!["launch".into()],
    }
}

pub fn task_payload(text: &str, platforms: &[&str]) -> JobPayload {
    JobPayload::Task(task(text, platforms))
}

pub fn competition_payload(text: &str, competitors: Option<&[&str]>) -> JobPayload {
    JobPayload::Competition(CompetitionPayload {
        task: task(text, &["x"]),
        competitors: competitors.map(|names| names.iter().map(|n| (*n).to_string()).collect()),
    })
}

/// Small pools and short backoff.
pub fn test_config() -> OrchestratorConfig {
    let mut cfg = OrchestratorConfig::default();
    cfg.task_pool.workers = 2;
    cfg.task_pool.base_backoff_ms = 50;
    cfg.competition_pool.workers = 2;
    cfg.competition_pool.base_backoff_ms = 50;
    cfg
}

/// Poll until the job reaches a terminal state.
pub async fn wait_for_terminal(orchestrator: &Orchestrator, id: SubmissionId) -> JobRecord {
    for _ in 0..1_000 {
        if let Some(record) = orchestrator.status(id) {
            if record.status.is_terminal() {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not finish");
}

// ============================================================================
// Collaborator doubles
// ============================================================================

/// Content generator that always fails.
#[derive(Default)]
pub struct FailingContent {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ContentGenerator for FailingContent {
    async fn analyze(&self, _text: &str) -> Result<ContentSignal, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CollaboratorError::Unavailable {
            target: "content".into(),
            message: "model offline".into(),
        })
    }
}

/// Content generator that fails the first `failures` calls.
pub struct FlakyContent {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyContent {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for FlakyContent {
    async fn analyze(&self, _text: &str) -> Result<ContentSignal, CollaboratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(CollaboratorError::Unavailable {
                target: "content".into(),
                message: format!("transient failure {call}"),
            });
        }
        Ok(ContentSignal {
            sentiment: 0.6,
            confidence: 0.8,
            degraded: false,
        })
    }
}

/// Pipeline that keeps every event it receives.
#[derive(Default)]
pub struct RecordingPipeline {
    pub events: Mutex<Vec<EvolutionEvent>>,
}

#[async_trait]
impl PipelineSync for RecordingPipeline {
    async fn sync_evolution(&self, event: EvolutionEvent) -> Result<(), CollaboratorError> {
        self.events.lock().push(event);
        Ok(())
    }
}

// ============================================================================
// Executors
// ============================================================================

/// Executor that records when each attempt ran and always fails retryably.
#[derive(Default)]
pub struct AlwaysFailingExecutor {
    pub attempts: Mutex<Vec<(u32, Instant)>>,
}

#[async_trait]
impl JobExecutor for AlwaysFailingExecutor {
    async fn execute(&self, job: &Job) -> Result<JobOutput, ExecutionError> {
        self.attempts.lock().push((job.attempts, Instant::now()));
        Err(CollaboratorError::Unavailable {
            target: "content".into(),
            message: "still down".into(),
        }
        .into())
    }
}

/// Executor that records the priority of every job, then waits for a permit.
pub struct GatedExecutor {
    pub order: Mutex<Vec<Priority>>,
    pub gate: tokio::sync::Semaphore,
}

impl GatedExecutor {
    pub fn new() -> Self {
        Self {
            order: Mutex::new(Vec::new()),
            gate: tokio::sync::Semaphore::new(0),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(1_000);
    }

    pub fn started(&self) -> usize {
        self.order.lock().len()
    }
}

#[async_trait]
impl JobExecutor for GatedExecutor {
    async fn execute(&self, job: &Job) -> Result<JobOutput, ExecutionError> {
        self.order.lock().push(job.submission.priority);
        let _permit = self.gate.acquire().await.map_err(|_| ExecutionError::Panicked)?;
        Ok(JobOutput::Task(TaskOutcome {
            amplification: 1.0,
            result: ContentSignal {
                sentiment: 0.0,
                confidence: 1.0,
                degraded: false,
            },
            share_outcomes: Vec::new(),
            cost: 0.0,
            tags: Vec::new(),
        }))
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
