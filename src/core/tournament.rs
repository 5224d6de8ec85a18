//! Self-compete tournaments: scoring, champion selection, evolution.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{TournamentConfig, WinRateDeltaConfig};
use crate::core::executor::TaskOutcome;

/// A scored competitor. Immutable once scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    /// Competitor name.
    pub variant_id: String,
    /// Fitness score.
    pub score: f64,
    /// Task result produced by the variant.
    pub result: TaskOutcome,
}

/// The winning variant annotated with its win-rate delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Champion {
    /// Winning competitor.
    pub variant_id: String,
    /// Its fitness score.
    pub score: f64,
    /// Improvement estimate driving promotion.
    pub win_rate_delta: f64,
    /// Its task result.
    pub result: TaskOutcome,
}

// ─── Scoring ────────────────────────────────────────────────────────────────

/// Assigns a fitness score to a completed variant.
pub trait FitnessScorer: Send + Sync + 'static {
    /// Score `outcome` produced by `variant_id`.
    fn score(&self, variant_id: &str, outcome: &TaskOutcome) -> f64;
}

/// Uniform random score in `[0, 1)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomScorer;

impl FitnessScorer for RandomScorer {
    fn score(&self, _variant_id: &str, _outcome: &TaskOutcome) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// Fixed score per variant; unknown variants get the fallback.
#[derive(Debug, Clone, Default)]
pub struct FixedScorer {
    scores: HashMap<String, f64>,
    fallback: f64,
}

impl FixedScorer {
    /// Scorer returning the given score for each named variant.
    pub fn new<I, S>(scores: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            scores: scores.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            fallback: 0.0,
        }
    }

    /// Score for variants not listed.
    #[must_use]
    pub const fn with_fallback(mut self, fallback: f64) -> Self {
        self.fallback = fallback;
        self
    }
}

impl FitnessScorer for FixedScorer {
    fn score(&self, variant_id: &str, _outcome: &TaskOutcome) -> f64 {
        self.scores.get(variant_id).copied().unwrap_or(self.fallback)
    }
}

// ─── Win-rate delta ─────────────────────────────────────────────────────────

/// Estimates how much better the champion is than the field.
pub trait WinRateDelta: Send + Sync + 'static {
    /// Delta for `champion` among `variants` (which include it).
    fn delta(&self, champion: &Variant, variants: &[Variant]) -> f64;
}

/// Constant delta.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelta(pub f64);

impl WinRateDelta for FixedDelta {
    fn delta(&self, _champion: &Variant, _variants: &[Variant]) -> f64 {
        self.0
    }
}

/// Champion score minus the best other score; `0.0` with a single variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunnerUpMargin;

impl WinRateDelta for RunnerUpMargin {
    fn delta(&self, champion: &Variant, variants: &[Variant]) -> f64 {
        variants
            .iter()
            .filter(|v| v.variant_id != champion.variant_id)
            .map(|v| v.score)
            .max_by(f64::total_cmp)
            .map_or(0.0, |runner_up| champion.score - runner_up)
    }
}

/// Build the configured delta strategy.
#[must_use]
pub fn win_rate_delta_from_config(cfg: &WinRateDeltaConfig) -> Arc<dyn WinRateDelta> {
    match cfg {
        WinRateDeltaConfig::Fixed { value } => Arc::new(FixedDelta(*value)),
        WinRateDeltaConfig::RunnerUpMargin => Arc::new(RunnerUpMargin),
    }
}

// ─── Selection ──────────────────────────────────────────────────────────────

/// Highest-scoring variant; ties go to the earliest in request order.
///
/// Returns `None` when no variant completed.
#[must_use]
pub fn select_champion(variants: &[Variant], delta: &dyn WinRateDelta) -> Option<Champion> {
    let mut best: Option<&Variant> = None;
    for variant in variants {
        match best {
            Some(current) if variant.score.total_cmp(&current.score).is_le() => {}
            _ => best = Some(variant),
        }
    }
    best.map(|winner| Champion {
        variant_id: winner.variant_id.clone(),
        score: winner.score,
        win_rate_delta: delta.delta(winner, variants),
        result: winner.result.clone(),
    })
}

/// Decides whether a champion gets promoted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvolutionPolicy {
    /// Minimum win-rate delta, exclusive.
    pub promotion_threshold: f64,
    /// Rollout percentage points added per promotion.
    pub rollout_step: u8,
}

impl EvolutionPolicy {
    /// Build from configuration.
    #[must_use]
    pub const fn new(cfg: &TournamentConfig) -> Self {
        Self {
            promotion_threshold: cfg.promotion_threshold,
            rollout_step: cfg.rollout_step,
        }
    }

    /// Promote only while the error budget is healthy and the delta clears
    /// the threshold.
    #[must_use]
    pub fn should_promote(&self, champion: &Champion, burn_rate: f64) -> bool {
        burn_rate < 1.0 && champion.win_rate_delta > self.promotion_threshold
    }

    /// Feature flag rolled out for a champion.
    #[must_use]
    pub fn flag_for(variant_id: &str) -> String {
        format!("champion-{variant_id}")
    }
}
