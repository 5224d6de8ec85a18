//! Worker pool integration tests: retries, backoff, priority, shutdown.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use common::{
    task_payload, test_config, wait_for_terminal, AlwaysFailingExecutor, FailingContent,
    FlakyContent, GatedExecutor,
};
use prometheus_arena::builders::OrchestratorBuilder;
use prometheus_arena::core::{
    AdmissionError, BreakerConfig, CircuitState, CollaboratorError, ExecutionError, Job,
    JobExecutor, JobKind, JobOutput, JobStatus, Priority, SubmitRequest,
};
use prometheus_arena::infra::StubPublisher;

fn submit(tenant: &str, priority: Priority) -> SubmitRequest {
    SubmitRequest::new(tenant, task_payload("Ship it", &["x"])).with_priority(priority)
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_always_failing_job_exhausts_after_three_attempts() {
    let mut cfg = test_config();
    cfg.task_pool.workers = 1;
    cfg.task_pool.base_backoff_ms = 100;
    let executor = Arc::new(AlwaysFailingExecutor::default());
    let orchestrator = OrchestratorBuilder::new(cfg)
        .with_executor(Arc::clone(&executor) as _)
        .build()
        .unwrap();

    let accepted = orchestrator.submit(submit("acme", Priority::Normal)).await.unwrap();
    let record = wait_for_terminal(&orchestrator, accepted.id).await;

    assert_eq!(record.status, JobStatus::FailedExhausted);
    assert_eq!(record.attempts, 3);
    assert!(record
        .error
        .as_deref()
        .is_some_and(|e| e.contains("delivery exhausted after 3 attempts")));

    let attempts = executor.attempts.lock().clone();
    let numbers: Vec<u32> = attempts.iter().map(|(n, _)| *n).collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    let first_gap = attempts[1].1 - attempts[0].1;
    let second_gap = attempts[2].1 - attempts[1].1;
    assert!(first_gap >= Duration::from_millis(100));
    assert!(second_gap >= Duration::from_millis(200));
    assert!(second_gap > first_gap);

    let stats = orchestrator.pool_stats(JobKind::Task);
    assert_eq!(stats.retried_jobs, 2);
    assert_eq!(stats.failed_jobs, 1);
    assert_eq!(orchestrator.error_budget().window_counts(), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_transient_content_failures_recover() {
    let content = Arc::new(FlakyContent::new(2));
    let orchestrator = OrchestratorBuilder::new(test_config())
        .with_content_generator(Arc::clone(&content) as _)
        .build()
        .unwrap();

    let accepted = orchestrator.submit(submit("acme", Priority::High)).await.unwrap();
    let record = wait_for_terminal(&orchestrator, accepted.id).await;

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.attempts, 3);
    assert_eq!(content.calls(), 3);
    let Some(JobOutput::Task(outcome)) = record.result else {
        panic!("expected a task outcome");
    };
    assert!(!outcome.result.degraded);
    assert_eq!(outcome.share_outcomes.len(), 1);
    assert!(outcome.share_outcomes[0].success);
    assert_eq!(outcome.tags, vec!["launch".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_content_outage_ends_in_exhaustion() {
    let content = Arc::new(FailingContent::default());
    let orchestrator = OrchestratorBuilder::new(test_config())
        .with_content_generator(Arc::clone(&content) as _)
        .build()
        .unwrap();

    let accepted = orchestrator.submit(submit("acme", Priority::Normal)).await.unwrap();
    let record = wait_for_terminal(&orchestrator, accepted.id).await;

    assert_eq!(record.status, JobStatus::FailedExhausted);
    assert_eq!(content.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
}

// ============================================================================
// Priority
// ============================================================================

#[tokio::test]
async fn test_urgent_runs_before_low_regardless_of_submit_order() {
    let mut cfg = test_config();
    cfg.task_pool.workers = 1;
    let executor = Arc::new(GatedExecutor::new());
    let orchestrator = OrchestratorBuilder::new(cfg)
        .with_executor(Arc::clone(&executor) as _)
        .build()
        .unwrap();

    // Occupy the only worker so the rest queue up.
    orchestrator.submit(submit("acme", Priority::Low)).await.unwrap();
    while executor.started() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for priority in [Priority::Low, Priority::Normal, Priority::Urgent, Priority::High] {
        orchestrator.submit(submit("acme", priority)).await.unwrap();
    }
    executor.open();
    while executor.started() < 5 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let order = executor.order.lock().clone();
    assert_eq!(
        order,
        vec![
            Priority::Low,
            Priority::Urgent,
            Priority::High,
            Priority::Normal,
            Priority::Low,
        ]
    );
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_shutdown_refuses_new_work() {
    let orchestrator = OrchestratorBuilder::new(test_config()).build().unwrap();

    let accepted = orchestrator.submit(submit("acme", Priority::Normal)).await.unwrap();
    wait_for_terminal(&orchestrator, accepted.id).await;
    orchestrator.shutdown().await;

    let err = orchestrator.submit(submit("acme", Priority::Normal)).await.unwrap_err();
    assert!(matches!(err, AdmissionError::QueueFull(_)));
    assert_eq!(orchestrator.pool_stats(JobKind::Task).completed_jobs, 1);
}

/// Executor that blocks until released, then fails retryably.
struct StalledFailure {
    started: AtomicUsize,
    gate: tokio::sync::Semaphore,
}

#[async_trait]
impl JobExecutor for StalledFailure {
    async fn execute(&self, _job: &Job) -> Result<JobOutput, ExecutionError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.map_err(|_| ExecutionError::Panicked)?;
        Err(CollaboratorError::Unavailable {
            target: "content".into(),
            message: "down".into(),
        }
        .into())
    }
}

#[tokio::test]
async fn test_retry_during_shutdown_marks_job_failed() {
    let executor = Arc::new(StalledFailure {
        started: AtomicUsize::new(0),
        gate: tokio::sync::Semaphore::new(0),
    });
    let orchestrator = OrchestratorBuilder::new(test_config())
        .with_executor(Arc::clone(&executor) as _)
        .build()
        .unwrap();

    let accepted = orchestrator.submit(submit("acme", Priority::Normal)).await.unwrap();
    while executor.started.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tokio::join!(orchestrator.shutdown(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        executor.gate.add_permits(1);
    });

    let record = orchestrator.status(accepted.id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.attempts, 1);
    assert!(record
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with("queue closed before retry")));
    let stats = orchestrator.pool_stats(JobKind::Task);
    assert_eq!(stats.failed_jobs, 1);
    assert_eq!(stats.retried_jobs, 0);
}

#[tokio::test]
async fn test_stats_report_both_pools() {
    let orchestrator = OrchestratorBuilder::new(test_config()).build().unwrap();

    let stats = orchestrator.stats();
    assert_eq!(stats.tasks.worker_count, 2);
    assert_eq!(stats.competitions.worker_count, 2);
    assert!(stats.burn_rate.abs() < f64::EPSILON);
    assert!(stats.breakers.is_empty());
}

// ============================================================================
// Open circuits
// ============================================================================

#[tokio::test]
async fn test_open_circuits_degrade_without_failing_the_task() {
    let mut cfg = test_config();
    cfg.task_pool.workers = 1;
    cfg.breakers.publish_overrides.insert(
        "linkedin".into(),
        BreakerConfig {
            volume_threshold: 2,
            ..cfg.breakers.publish.clone()
        },
    );
    let orchestrator = OrchestratorBuilder::new(cfg)
        .with_publisher(Arc::new(StubPublisher::new(["x"])))
        .build()
        .unwrap();
    let content_cfg = orchestrator.config().breakers.content.clone();
    orchestrator
        .breakers()
        .get_or_create("content", &content_cfg)
        .force_open();

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let accepted = orchestrator
            .submit(SubmitRequest::new("acme", task_payload("Ship it", &["x", "linkedin"])))
            .await
            .unwrap();
        let record = wait_for_terminal(&orchestrator, accepted.id).await;
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.attempts, 1);
        let Some(JobOutput::Task(outcome)) = record.result else {
            panic!("expected a task outcome");
        };
        outcomes.push(outcome);
    }

    for outcome in &outcomes {
        assert!(outcome.result.degraded);
        let x = &outcome.share_outcomes[0];
        assert_eq!(x.platform, "x");
        assert!(x.success && x.post_id.is_some());
        assert!(!outcome.share_outcomes[1].success);
    }
    // The first two publishes reached the platform; the third was cut off.
    let rejected = outcomes[0].share_outcomes[1].error.as_deref().unwrap();
    assert!(rejected.contains("unsupported platform"));
    let cut_off = outcomes[2].share_outcomes[1].error.as_deref().unwrap();
    assert_eq!(cut_off, "circuit open for publish:linkedin");

    let breakers = orchestrator.breakers();
    assert_eq!(breakers.get("publish:linkedin").unwrap().state(), CircuitState::Open);
    assert_eq!(breakers.get("publish:x").unwrap().state(), CircuitState::Closed);
    assert_eq!(breakers.get("publish:linkedin").unwrap().config().volume_threshold, 2);
    assert_eq!(breakers.get("publish:x").unwrap().config().volume_threshold, 5);
    assert_eq!(breakers.get("content").unwrap().snapshot().short_circuits, 3);
}
