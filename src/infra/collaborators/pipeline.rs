//! Pipeline sync that only logs.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::core::{CollaboratorError, EvolutionEvent, PipelineSync};

/// Logs evolution events and counts them.
#[derive(Debug, Default)]
pub struct LoggingPipelineSync {
    synced: AtomicU64,
}

impl LoggingPipelineSync {
    /// New sync with a zero counter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            synced: AtomicU64::new(0),
        }
    }

    /// Events received so far.
    #[must_use]
    pub fn synced(&self) -> u64 {
        self.synced.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PipelineSync for LoggingPipelineSync {
    async fn sync_evolution(&self, event: EvolutionEvent) -> Result<(), CollaboratorError> {
        self.synced.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            competition_id = %event.competition_id,
            tenant = %event.tenant_id,
            champion = %event.champion,
            win_rate_delta = event.win_rate_delta,
            rollout_percentage = event.rollout_percentage,
            "evolution synced"
        );
        Ok(())
    }
}
