//! Interfaces of the external collaborators the workers call.
//!
//! Content generation, publishing and pipeline sync live outside this crate.
//! Workers reach them only through these traits, always behind a
//! [`CircuitBreaker`](crate::core::CircuitBreaker).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::CollaboratorError;

/// Analysis returned by the content collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContentSignal {
    /// Sentiment in `[-1, 1]`.
    pub sentiment: f64,
    /// Confidence in `[0, 1]`; drives amplification.
    pub confidence: f64,
    /// Set when the value came from a breaker fallback.
    #[serde(default)]
    pub degraded: bool,
}

impl ContentSignal {
    /// Neutral, zero-confidence signal used when the content circuit is open.
    #[must_use]
    pub const fn degraded() -> Self {
        Self {
            sentiment: 0.0,
            confidence: 0.0,
            degraded: true,
        }
    }
}

/// Receipt of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareReceipt {
    /// Identifier assigned by the platform.
    pub post_id: String,
    /// Platform the content went to.
    pub platform: String,
}

/// Per-platform publish outcome recorded in a task result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareOutcome {
    /// Target platform.
    pub platform: String,
    /// Whether the publish succeeded.
    pub success: bool,
    /// Post identifier on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    /// Failure description otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ShareOutcome {
    /// Outcome for a receipt.
    #[must_use]
    pub fn shared(receipt: ShareReceipt) -> Self {
        Self {
            platform: receipt.platform,
            success: true,
            post_id: Some(receipt.post_id),
            error: None,
        }
    }

    /// Outcome for a failed publish.
    #[must_use]
    pub fn failed(platform: impl Into<String>, error: &CollaboratorError) -> Self {
        Self {
            platform: platform.into(),
            success: false,
            post_id: None,
            error: Some(error.to_string()),
        }
    }
}

/// Champion promotion forwarded to the downstream pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionEvent {
    /// Competition that produced the champion.
    pub competition_id: Uuid,
    /// Tenant that ran the competition.
    pub tenant_id: String,
    /// Winning variant.
    pub champion: String,
    /// Win-rate delta that justified promotion.
    pub win_rate_delta: f64,
    /// Rollout percentage of the champion flag after promotion.
    pub rollout_percentage: u8,
}

/// Content analysis collaborator.
#[async_trait]
pub trait ContentGenerator: Send + Sync + 'static {
    /// Analyse `text`.
    async fn analyze(&self, text: &str) -> Result<ContentSignal, CollaboratorError>;
}

/// Publishing collaborator.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Publish `content` to `platform`.
    async fn publish(&self, platform: &str, content: &str) -> Result<ShareReceipt, CollaboratorError>;
}

/// Downstream pipeline notified of champion promotions.
#[async_trait]
pub trait PipelineSync: Send + Sync + 'static {
    /// Forward an evolution event. Callers do not wait on the outcome.
    async fn sync_evolution(&self, event: EvolutionEvent) -> Result<(), CollaboratorError>;
}
