//! Priority job queue with delayed retries.
//!
//! Ready jobs sit in a binary heap ordered by priority value (urgent first)
//! and FIFO by enqueue sequence within a priority. Jobs scheduled for retry
//! wait in a separate heap keyed by due time and are promoted to the ready
//! heap when their backoff elapses. Workers block on [`JobQueue::dequeue`]
//! without polling.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::core::{JobKind, SchedulerError, Submission, SubmissionId};

/// A submission moving through the queue.
#[derive(Debug, Clone)]
pub struct Job {
    /// The immutable submission.
    pub submission: Submission,
    /// Delivery attempts made so far.
    pub attempts: u32,
    /// When the next retry becomes due, if one is scheduled.
    pub next_retry_at: Option<Instant>,
    /// Error of the most recent failed attempt.
    pub last_error: Option<String>,
}

impl Job {
    /// Fresh job with no attempts.
    #[must_use]
    pub const fn new(submission: Submission) -> Self {
        Self {
            submission,
            attempts: 0,
            next_retry_at: None,
            last_error: None,
        }
    }

    /// Submission identifier.
    #[must_use]
    pub const fn id(&self) -> SubmissionId {
        self.submission.id
    }
}

/// Exponential backoff before retrying after `attempt` failed deliveries.
///
/// `base × 2^(attempt-1)`, saturating.
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent)
}

/// Heap entry ordering jobs by priority then enqueue sequence.
struct ReadyJob {
    priority: u8,
    seq: u64,
    job: Job,
}

impl PartialEq for ReadyJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for ReadyJob {}

impl PartialOrd for ReadyJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: lower priority value and lower sequence must compare greater.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct DelayedJob {
    due: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for DelayedJob {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for DelayedJob {}

impl PartialOrd for DelayedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct State {
    ready: BinaryHeap<ReadyJob>,
    delayed: BinaryHeap<Reverse<DelayedJob>>,
    closed: bool,
}

impl State {
    fn promote_due(&mut self, now: Instant) {
        while let Some(Reverse(next)) = self.delayed.peek() {
            if next.due > now {
                break;
            }
            if let Some(Reverse(delayed)) = self.delayed.pop() {
                self.ready.push(ReadyJob {
                    priority: delayed.job.submission.priority.value(),
                    seq: delayed.seq,
                    job: delayed.job,
                });
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.peek().map(|Reverse(delayed)| delayed.due)
    }
}

/// Bounded priority queue for one job kind.
pub struct JobQueue {
    kind: JobKind,
    max_depth: usize,
    state: Mutex<State>,
    seq: AtomicU64,
    enqueued: AtomicU64,
    notify: Notify,
}

impl JobQueue {
    /// Empty queue holding at most `max_depth` jobs (ready plus delayed).
    #[must_use]
    pub fn new(kind: JobKind, max_depth: usize) -> Self {
        Self {
            kind,
            max_depth,
            state: Mutex::new(State::default()),
            seq: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Job kind served by this queue.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        self.kind
    }

    /// Configured maximum depth.
    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Push a new job.
    ///
    /// # Errors
    ///
    /// `QueueFull` when the depth limit is reached, `Closed` after shutdown.
    pub fn enqueue(&self, job: Job) -> Result<(), SchedulerError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(SchedulerError::Closed);
            }
            if state.ready.len() + state.delayed.len() >= self.max_depth {
                return Err(SchedulerError::QueueFull(format!(
                    "{} queue reached max depth {}",
                    self.kind, self.max_depth
                )));
            }
            state.ready.push(ReadyJob {
                priority: job.submission.priority.value(),
                seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
                job,
            });
        }
        self.enqueued.fetch_add(1, AtomicOrdering::Relaxed);
        self.notify.notify_one();
        Ok(())
    }

    /// Hold `job` aside and make it ready again after `delay`.
    ///
    /// Retries bypass the depth limit: the job was already admitted.
    ///
    /// # Errors
    ///
    /// `Closed` after shutdown; the job is dropped.
    pub fn retry(&self, mut job: Job, delay: Duration) -> Result<(), SchedulerError> {
        let due = Instant::now() + delay;
        job.next_retry_at = Some(due);
        {
            let mut state = self.state.lock();
            if state.closed {
                tracing::debug!(job_id = %job.id(), "queue closed, dropping retry");
                return Err(SchedulerError::Closed);
            }
            state.delayed.push(Reverse(DelayedJob {
                due,
                seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
                job,
            }));
        }
        // A sleeping worker may need to shorten its wait.
        self.notify.notify_one();
        Ok(())
    }

    /// Pop the highest-priority ready job without waiting.
    ///
    /// The returned job has its attempt counter incremented.
    pub fn try_dequeue(&self) -> Option<Job> {
        let mut state = self.state.lock();
        state.promote_due(Instant::now());
        state.ready.pop().map(|ready| {
            let mut job = ready.job;
            job.attempts += 1;
            job.next_retry_at = None;
            job
        })
    }

    /// Wait for the next ready job.
    ///
    /// Returns `None` once the queue is closed.
    pub async fn dequeue(&self) -> Option<Job> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                state.promote_due(Instant::now());
                if let Some(ready) = state.ready.pop() {
                    let more = !state.ready.is_empty();
                    drop(state);
                    if more {
                        // Pass the wake-up on so idle workers keep draining.
                        self.notify.notify_one();
                    }
                    let mut job = ready.job;
                    job.attempts += 1;
                    job.next_retry_at = None;
                    return Some(job);
                }
                state.next_due()
            };

            match next_due {
                Some(due) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = tokio::time::sleep_until(due) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Stop handing out jobs and wake every waiting worker.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Whether [`JobQueue::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Jobs held (ready plus delayed).
    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.delayed.len()
    }

    /// Whether no jobs are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs accepted by [`JobQueue::enqueue`] since creation.
    #[must_use]
    pub fn enqueued_total(&self) -> u64 {
        self.enqueued.load(AtomicOrdering::Relaxed)
    }

    /// Jobs waiting for their retry backoff.
    #[must_use]
    pub fn delayed_len(&self) -> usize {
        self.state.lock().delayed.len()
    }
}
