//! Job execution: task logic, competition logic, and the executor seam.
//!
//! Workers hand each dequeued [`Job`] to a [`JobExecutor`]. The production
//! implementation, [`ArenaExecutor`], calls collaborators through per-target
//! circuit breakers and runs tournaments by fanning out variants with
//! `join_all`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{BreakersConfig, TournamentConfig};
use crate::core::circuit_breaker::BreakerRegistry;
use crate::core::collaborators::{
    ContentGenerator, ContentSignal, EvolutionEvent, PipelineSync, Publisher, ShareOutcome,
};
use crate::core::cost::CostEstimator;
use crate::core::error_budget::ErrorBudget;
use crate::core::feature_gate::FeatureFlagStore;
use crate::core::queue::Job;
use crate::core::tournament::{
    select_champion, Champion, EvolutionPolicy, FitnessScorer, Variant, WinRateDelta,
};
use crate::core::{CompetitionPayload, ExecutionError, JobPayload, SubmissionId, TaskPayload};
use crate::util::metrics::{record_competition_cost, record_promotion};

/// Breaker target for the content collaborator.
pub const CONTENT_TARGET: &str = "content";

/// Breaker target for one publish platform.
#[must_use]
pub fn publish_target(platform: &str) -> String {
    format!("publish:{platform}")
}

/// Result of one task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    /// `confidence × (1 + 0.5 × successful_shares)`.
    pub amplification: f64,
    /// Content analysis used for the run.
    pub result: ContentSignal,
    /// One entry per requested platform.
    pub share_outcomes: Vec<ShareOutcome>,
    /// Cost of the run.
    pub cost: f64,
    /// Tags echoed from the payload.
    pub tags: Vec<String>,
}

/// Result of a tournament.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionOutcome {
    /// Winning variant.
    pub champion: Champion,
    /// Every completed variant in request order.
    pub variants: Vec<Variant>,
    /// Variants whose run failed.
    pub failed_variants: Vec<String>,
    /// Sum of completed variants' costs.
    pub cost: f64,
    /// Tags echoed from the payload.
    pub tags: Vec<String>,
    /// Whether the champion's rollout was increased.
    pub promoted: bool,
}

/// Output stored in the mailbox for a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutput {
    /// Task result.
    Task(TaskOutcome),
    /// Tournament result.
    Competition(CompetitionOutcome),
}

impl JobOutput {
    /// Cost attributed to the job.
    #[must_use]
    pub const fn cost(&self) -> f64 {
        match self {
            Self::Task(outcome) => outcome.cost,
            Self::Competition(outcome) => outcome.cost,
        }
    }
}

/// Executes dequeued jobs.
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    /// Run one delivery attempt of `job`.
    async fn execute(&self, job: &Job) -> Result<JobOutput, ExecutionError>;
}

/// Handles to the external collaborators.
#[derive(Clone)]
pub struct Collaborators {
    /// Content analysis.
    pub content: Arc<dyn ContentGenerator>,
    /// Publishing.
    pub publisher: Arc<dyn Publisher>,
    /// Evolution pipeline.
    pub pipeline: Arc<dyn PipelineSync>,
}

/// Production executor wiring collaborators, breakers and tournament logic.
pub struct ArenaExecutor {
    collaborators: Collaborators,
    breakers: Arc<BreakerRegistry>,
    breaker_config: BreakersConfig,
    estimator: Arc<dyn CostEstimator>,
    scorer: Arc<dyn FitnessScorer>,
    win_rate: Arc<dyn WinRateDelta>,
    evolution: EvolutionPolicy,
    default_competitors: Vec<String>,
    features: Arc<dyn FeatureFlagStore>,
    budget: Arc<ErrorBudget>,
}

/// Shared components an [`ArenaExecutor`] reads.
pub struct ExecutorParts {
    /// Collaborator handles.
    pub collaborators: Collaborators,
    /// Breaker registry.
    pub breakers: Arc<BreakerRegistry>,
    /// Cost estimator.
    pub estimator: Arc<dyn CostEstimator>,
    /// Variant scorer.
    pub scorer: Arc<dyn FitnessScorer>,
    /// Win-rate delta strategy.
    pub win_rate: Arc<dyn WinRateDelta>,
    /// Feature flags, updated on promotion.
    pub features: Arc<dyn FeatureFlagStore>,
    /// Error budget consulted before promotion.
    pub budget: Arc<ErrorBudget>,
}

impl ArenaExecutor {
    /// Assemble an executor.
    #[must_use]
    pub fn new(parts: ExecutorParts, breakers: &BreakersConfig, tournament: &TournamentConfig) -> Self {
        Self {
            collaborators: parts.collaborators,
            breakers: parts.breakers,
            breaker_config: breakers.clone(),
            estimator: parts.estimator,
            scorer: parts.scorer,
            win_rate: parts.win_rate,
            evolution: EvolutionPolicy::new(tournament),
            default_competitors: tournament.competitors.clone(),
            features: parts.features,
            budget: parts.budget,
        }
    }

    /// Run task logic once. `variant` styles the published content.
    ///
    /// # Errors
    ///
    /// Content collaborator failures while its circuit is closed. Publish
    /// failures never fail the task; they become failed share outcomes.
    pub async fn run_task(
        &self,
        task: &TaskPayload,
        variant: Option<&str>,
    ) -> Result<TaskOutcome, ExecutionError> {
        let content = &self.collaborators.content;
        let breaker = self
            .breakers
            .get_or_create(CONTENT_TARGET, &self.breaker_config.content);
        let signal = breaker
            .call(
                || content.analyze(&task.text),
                |_| Ok(ContentSignal::degraded()),
            )
            .await?;

        let body = match variant {
            Some(name) => format!("[{name}] {}", task.text),
            None => task.text.clone(),
        };
        let share_outcomes = join_all(
            task.platforms
                .iter()
                .map(|platform| self.publish_one(platform, &body)),
        )
        .await;

        let successful = share_outcomes.iter().filter(|s| s.success).count();
        #[allow(clippy::cast_precision_loss)]
        let amplification = signal.confidence * 0.5f64.mul_add(successful as f64, 1.0);

        Ok(TaskOutcome {
            amplification,
            result: signal,
            share_outcomes,
            cost: self.estimator.task_cost(task),
            tags: task.tags.clone(),
        })
    }

    async fn publish_one(&self, platform: &str, body: &str) -> ShareOutcome {
        let publisher = &self.collaborators.publisher;
        let breaker = self
            .breakers
            .get_or_create(&publish_target(platform), self.breaker_config.publish_for(platform));
        match breaker
            .call(|| publisher.publish(platform, body), Err)
            .await
        {
            Ok(receipt) => ShareOutcome::shared(receipt),
            Err(e) => {
                debug!(platform, error = %e, "publish failed");
                ShareOutcome::failed(platform, &e)
            }
        }
    }

    /// Race every competitor, pick a champion, and apply evolution.
    ///
    /// # Errors
    ///
    /// [`ExecutionError::NoCompetitorsCompleted`] when every variant failed.
    pub async fn run_competition(
        &self,
        competition_id: SubmissionId,
        tenant_id: &str,
        payload: &CompetitionPayload,
    ) -> Result<CompetitionOutcome, ExecutionError> {
        let competitors = payload
            .competitors
            .as_deref()
            .unwrap_or(self.default_competitors.as_slice());

        let runs = join_all(competitors.iter().map(|name| async move {
            let outcome = self.run_task(&payload.task, Some(name.as_str())).await;
            (name, outcome)
        }))
        .await;

        let mut variants = Vec::with_capacity(runs.len());
        let mut failed_variants = Vec::new();
        for (name, outcome) in runs {
            match outcome {
                Ok(result) => variants.push(Variant {
                    variant_id: name.clone(),
                    score: self.scorer.score(name, &result),
                    result,
                }),
                Err(e) => {
                    warn!(competition_id = %competition_id, variant = %name, error = %e, "variant failed");
                    failed_variants.push(name.clone());
                }
            }
        }

        let Some(champion) = select_champion(&variants, self.win_rate.as_ref()) else {
            return Err(ExecutionError::NoCompetitorsCompleted {
                attempted: competitors.len(),
            });
        };
        let cost: f64 = variants.iter().map(|v| v.result.cost).sum();
        record_competition_cost(cost);

        let promoted = self.evolve(competition_id, tenant_id, &champion);
        info!(
            competition_id = %competition_id,
            champion = %champion.variant_id,
            score = champion.score,
            win_rate_delta = champion.win_rate_delta,
            promoted,
            "competition finished"
        );

        Ok(CompetitionOutcome {
            champion,
            variants,
            failed_variants,
            cost,
            tags: payload.task.tags.clone(),
            promoted,
        })
    }

    fn evolve(&self, competition_id: SubmissionId, tenant_id: &str, champion: &Champion) -> bool {
        if !self.evolution.should_promote(champion, self.budget.burn_rate()) {
            return false;
        }
        let flag = EvolutionPolicy::flag_for(&champion.variant_id);
        let rollout_percentage = self
            .features
            .increase_rollout(&flag, self.evolution.rollout_step);
        record_promotion(&champion.variant_id);

        let event = EvolutionEvent {
            competition_id,
            tenant_id: tenant_id.to_string(),
            champion: champion.variant_id.clone(),
            win_rate_delta: champion.win_rate_delta,
            rollout_percentage,
        };
        let pipeline = Arc::clone(&self.collaborators.pipeline);
        tokio::spawn(async move {
            if let Err(e) = pipeline.sync_evolution(event).await {
                warn!(error = %e, "evolution sync failed");
            }
        });
        true
    }
}

#[async_trait]
impl JobExecutor for ArenaExecutor {
    async fn execute(&self, job: &Job) -> Result<JobOutput, ExecutionError> {
        match &job.submission.payload {
            JobPayload::Task(task) => self.run_task(task, None).await.map(JobOutput::Task),
            JobPayload::Competition(competition) => self
                .run_competition(job.id(), &job.submission.tenant_id, competition)
                .await
                .map(JobOutput::Competition),
        }
    }
}
