//! Fire-and-forget usage events for billing reconciliation.
//!
//! Admission emits one [`UsageEvent`] per accepted submission through a
//! bounded channel with `try_send`. A full channel drops the event with a
//! warning; the request path never waits. A background drain writes events to
//! a [`UsageSink`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::{JobKind, SubmissionId};

/// Usage record for one accepted submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    /// Submission the charge belongs to.
    pub submission_id: SubmissionId,
    /// Forecast cost recorded against the tenant.
    pub forecast_cost: f64,
    /// Tenant charged.
    pub tenant_id: String,
    /// Job kind.
    pub kind: JobKind,
    /// Origin of the request.
    pub source: String,
    /// Emission time (ms since epoch).
    pub created_at_ms: u128,
}

/// Destination for drained usage events.
pub trait UsageSink: Send + Sync + 'static {
    /// Store one event.
    fn record(&self, event: UsageEvent);
}

/// Bounded in-memory sink; oldest events are dropped first.
pub struct InMemoryUsageSink {
    events: Mutex<VecDeque<UsageEvent>>,
    max_events: usize,
}

impl InMemoryUsageSink {
    /// Sink keeping at most `max_events`.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<UsageEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored event count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total forecast cost stored for `tenant`.
    #[must_use]
    pub fn total_for(&self, tenant: &str) -> f64 {
        self.events
            .lock()
            .iter()
            .filter(|e| e.tenant_id == tenant)
            .map(|e| e.forecast_cost)
            .sum()
    }
}

impl UsageSink for InMemoryUsageSink {
    fn record(&self, event: UsageEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Non-blocking sender side of the usage channel.
#[derive(Clone)]
pub struct UsageReporter {
    tx: mpsc::Sender<UsageEvent>,
}

impl UsageReporter {
    /// Channel with room for `capacity` pending events.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<UsageEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Hand `event` off without waiting. Returns whether it was queued.
    pub fn emit(&self, event: UsageEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    submission_id = %event.submission_id,
                    tenant = %event.tenant_id,
                    "usage channel full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::debug!(submission_id = %event.submission_id, "usage channel closed");
                false
            }
        }
    }
}

/// Drain `rx` into `sink` until every reporter is dropped.
pub fn spawn_usage_drain(
    mut rx: mpsc::Receiver<UsageEvent>,
    sink: Arc<dyn UsageSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            sink.record(event);
        }
        tracing::debug!("usage drain stopped");
    })
}
