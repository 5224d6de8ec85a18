//! Fixed-size async worker pool draining one job queue.
//!
//! Each worker is a tokio task looping `dequeue → execute → record outcome`.
//! Execution runs inside a `job` tracing span. Outcomes update the result
//! mailbox and the error budget:
//!
//! - success: `completed`, budget success
//! - retryable error with attempts left: `retrying`, re-queued with backoff
//! - retryable error on the last attempt: `failed-exhausted`, budget failure
//! - non-retryable error: `failed`, budget failure
//!
//! Pool statistics live in lock-free counters.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::PoolConfig;
use crate::core::error_budget::ErrorBudget;
use crate::core::executor::{JobExecutor, JobOutput};
use crate::core::mailbox::{JobStatus, ResultMailbox};
use crate::core::queue::{backoff_delay, Job, JobQueue};
use crate::core::{ExecutionError, JobKind};
use crate::util::metrics::{record_burn_rate, record_job_duration, record_job_outcome};

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised when starting a pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Configuration validation failed.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of workers.
    pub worker_count: usize,
    /// Jobs executing now.
    pub active_jobs: u64,
    /// Jobs waiting in the queue, including delayed retries.
    pub queued_jobs: u64,
    /// Jobs accepted by the queue.
    pub submitted_jobs: u64,
    /// Jobs completed successfully.
    pub completed_jobs: u64,
    /// Jobs that reached a failed terminal state.
    pub failed_jobs: u64,
    /// Retries scheduled.
    pub retried_jobs: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

/// State shared by every worker of a pool.
struct Shared {
    kind: JobKind,
    config: PoolConfig,
    queue: Arc<JobQueue>,
    executor: Arc<dyn JobExecutor>,
    mailbox: Arc<ResultMailbox>,
    budget: Arc<ErrorBudget>,
    counters: PoolCounters,
}

/// Handles a pool needs besides its configuration.
pub struct PoolParts {
    /// Queue to drain.
    pub queue: Arc<JobQueue>,
    /// Executor for dequeued jobs.
    pub executor: Arc<dyn JobExecutor>,
    /// Where outcomes are recorded.
    pub mailbox: Arc<ResultMailbox>,
    /// Error budget fed by terminal outcomes.
    pub budget: Arc<ErrorBudget>,
}

/// Worker pool for one job kind.
pub struct WorkerPool {
    shared: Arc<Shared>,
    shutdown: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `config.workers` workers on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidConfig`] when the configuration is invalid.
    pub fn start(config: PoolConfig, parts: PoolParts) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let shared = Arc::new(Shared {
            kind: parts.queue.kind(),
            config,
            queue: parts.queue,
            executor: parts.executor,
            mailbox: parts.mailbox,
            budget: parts.budget,
            counters: PoolCounters::default(),
        });

        let workers = (0..shared.config.workers)
            .map(|worker_id| tokio::spawn(run_worker(worker_id, Arc::clone(&shared))))
            .collect();

        info!(
            kind = %shared.kind,
            workers = shared.config.workers,
            max_queue_depth = shared.config.max_queue_depth,
            max_attempts = shared.config.max_attempts,
            "worker pool started"
        );

        Ok(Self {
            shared,
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(workers),
        })
    }

    /// Job kind served.
    #[must_use]
    pub fn kind(&self) -> JobKind {
        self.shared.kind
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let counters = &self.shared.counters;
        PoolStats {
            worker_count: self.shared.config.workers,
            active_jobs: counters.active.load(Ordering::Relaxed),
            queued_jobs: self.shared.queue.len() as u64,
            submitted_jobs: self.shared.queue.enqueued_total(),
            completed_jobs: counters.completed.load(Ordering::Relaxed),
            failed_jobs: counters.failed.load(Ordering::Relaxed),
            retried_jobs: counters.retried.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work and wait for workers to finish their current job.
    ///
    /// Workers still running after a timeout are detached.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(kind = %self.shared.kind, "shutting down worker pool");
        self.shared.queue.close();

        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for (worker_id, handle) in workers.into_iter().enumerate() {
            match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!(worker_id, "worker joined"),
                Ok(Err(e)) => warn!(worker_id, error = %e, "worker task failed"),
                Err(_) => warn!(worker_id, "worker did not exit within timeout, detaching"),
            }
        }
        info!(kind = %self.shared.kind, "worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            // Without an explicit shutdown the workers are left to exit on their own.
            self.shared.queue.close();
            debug!(kind = %self.shared.kind, "worker pool dropped without shutdown");
        }
    }
}

async fn run_worker(worker_id: usize, shared: Arc<Shared>) {
    debug!(worker_id, kind = %shared.kind, "worker started");
    while let Some(job) = shared.queue.dequeue().await {
        let span = info_span!(
            "job",
            job_id = %job.id(),
            tenant = %job.submission.tenant_id,
            kind = %shared.kind,
            attempt = job.attempts,
        );
        process(&shared, job).instrument(span).await;
    }
    debug!(worker_id, kind = %shared.kind, "worker stopped");
}

async fn process(shared: &Shared, mut job: Job) {
    let id = job.id();
    shared.counters.active.fetch_add(1, Ordering::Relaxed);
    shared.mailbox.mark_running(id, job.attempts);
    let started = Instant::now();

    let result: Result<JobOutput, ExecutionError> =
        match AssertUnwindSafe(shared.executor.execute(&job)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Panicked),
        };

    record_job_duration(shared.kind.as_str(), started.elapsed().as_secs_f64());
    shared.counters.active.fetch_sub(1, Ordering::Relaxed);

    let tenant = job.submission.tenant_id.clone();
    let status = match result {
        Ok(output) => {
            shared.mailbox.complete(id, job.attempts, output);
            shared.budget.record_success();
            shared.counters.completed.fetch_add(1, Ordering::Relaxed);
            debug!("job completed");
            JobStatus::Completed
        }
        Err(e) if e.is_retryable() && job.attempts < shared.config.max_attempts => {
            let delay = backoff_delay(shared.config.base_backoff(), job.attempts);
            warn!(error = %e, delay_ms = delay.as_millis(), "attempt failed, retrying");
            shared.mailbox.mark_retrying(id, job.attempts, e.to_string());
            job.last_error = Some(e.to_string());
            let attempts = job.attempts;
            match shared.queue.retry(job, delay) {
                Ok(()) => {
                    shared.counters.retried.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(closed) => {
                    warn!(error = %e, "pool shutting down, retry abandoned");
                    shared.mailbox.fail(
                        id,
                        JobStatus::Failed,
                        attempts,
                        format!("{closed} before retry: {e}"),
                    );
                    shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                    JobStatus::Failed
                }
            }
        }
        Err(e) if e.is_retryable() => {
            let exhausted = ExecutionError::QueueDeliveryExhausted {
                attempts: job.attempts,
                last_error: e.to_string(),
            };
            warn!(error = %exhausted, "job failed, attempts exhausted");
            shared.mailbox.fail(id, JobStatus::FailedExhausted, job.attempts, exhausted.to_string());
            shared.budget.record_failure();
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            JobStatus::FailedExhausted
        }
        Err(e) => {
            warn!(error = %e, "job failed");
            shared.mailbox.fail(id, JobStatus::Failed, job.attempts, e.to_string());
            shared.budget.record_failure();
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            JobStatus::Failed
        }
    };

    record_job_outcome(shared.kind.as_str(), &tenant, status.as_str());
    record_burn_rate(shared.budget.burn_rate());
}
