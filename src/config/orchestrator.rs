//! Orchestrator configuration structures.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::circuit_breaker::BreakerConfig;

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
        }
    }
}

/// Queue and worker settings for one job kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of concurrent workers draining the queue.
    pub workers: usize,
    /// Maximum queued jobs before admission is refused.
    pub max_queue_depth: usize,
    /// Delivery attempts per job, including the first.
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles on every further attempt.
    pub base_backoff_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            max_queue_depth: 10_000,
            max_attempts: 3,
            base_backoff_ms: 500,
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".into());
        }
        Ok(())
    }

    /// Base backoff as a duration.
    #[must_use]
    pub const fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }
}

/// Idempotency store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// How long an accepted record is replayed.
    pub ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self { ttl_secs: 86_400 }
    }
}

/// Cost forecasting and tenant margin settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Fixed cost of one task execution.
    pub task_base_cost: f64,
    /// Additional cost per requested publish platform.
    pub per_platform_cost: f64,
    /// Margin granted to tenants without an explicit entry.
    pub default_margin: f64,
    /// Per-tenant margin overrides.
    pub tenant_margins: HashMap<String, f64>,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            task_base_cost: 1.0,
            per_platform_cost: 0.25,
            default_margin: 100.0,
            tenant_margins: HashMap::new(),
        }
    }
}

/// Error-budget gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBudgetConfig {
    /// Target success ratio; `1 - slo_target` is the allowed failure ratio.
    pub slo_target: f64,
    /// Sliding window length.
    pub window_secs: u64,
    /// Minimum denominator used when the window holds fewer outcomes.
    pub min_samples: usize,
}

impl Default for ErrorBudgetConfig {
    fn default() -> Self {
        Self {
            slo_target: 0.95,
            window_secs: 300,
            min_samples: 20,
        }
    }
}

/// Rollout definition of a single feature flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagConfig {
    /// Percentage of tenants (0-100) for which the flag is on.
    pub rollout_percentage: u8,
    /// Tenants that always see the flag enabled.
    pub allow: Vec<String>,
    /// Tenants that never see the flag enabled.
    pub deny: Vec<String>,
}

/// Feature-gate seed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Flags keyed by name, e.g. `task-v2`.
    pub flags: HashMap<String, FlagConfig>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        let full = FlagConfig {
            rollout_percentage: 100,
            ..FlagConfig::default()
        };
        let flags = [("task-v2", full.clone()), ("competition-v2", full)]
            .into_iter()
            .map(|(name, flag)| (name.to_string(), flag))
            .collect();
        Self { flags }
    }
}

/// How the champion's win-rate delta is computed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum WinRateDeltaConfig {
    /// Constant improvement over baseline.
    Fixed {
        /// The constant delta.
        value: f64,
    },
    /// Champion score minus the runner-up score.
    RunnerUpMargin,
}

impl Default for WinRateDeltaConfig {
    fn default() -> Self {
        Self::Fixed { value: 0.07 }
    }
}

/// Tournament and evolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TournamentConfig {
    /// Variants raced when a submission does not name its own.
    pub competitors: Vec<String>,
    /// Further variant names a submission may race. Together with
    /// `competitors` this bounds the set of `champion-*` flags.
    pub extra_variants: Vec<String>,
    /// Win-rate delta that must be exceeded before promotion.
    pub promotion_threshold: f64,
    /// Rollout percentage points added per promotion.
    pub rollout_step: u8,
    /// Delta computation strategy.
    pub win_rate_delta: WinRateDeltaConfig,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            competitors: ["aggressive", "balanced", "conservative", "experimental"]
                .into_iter()
                .map(String::from)
                .collect(),
            extra_variants: Vec::new(),
            promotion_threshold: 0.05,
            rollout_step: 10,
            win_rate_delta: WinRateDeltaConfig::default(),
        }
    }
}

impl TournamentConfig {
    /// Every variant name a submission may race.
    #[must_use]
    pub fn known_variants(&self) -> HashSet<String> {
        self.competitors
            .iter()
            .chain(&self.extra_variants)
            .cloned()
            .collect()
    }
}

/// Breaker tuning per collaborator boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakersConfig {
    /// Breaker for the content generator.
    pub content: BreakerConfig,
    /// Breaker applied to publish platforms without an override.
    pub publish: BreakerConfig,
    /// Per-platform publish tuning, keyed by platform name.
    pub publish_overrides: HashMap<String, BreakerConfig>,
}

impl BreakersConfig {
    /// Breaker settings for publishing to `platform`.
    #[must_use]
    pub fn publish_for(&self, platform: &str) -> &BreakerConfig {
        self.publish_overrides.get(platform).unwrap_or(&self.publish)
    }
}

impl Default for BreakersConfig {
    fn default() -> Self {
        Self {
            content: BreakerConfig {
                error_threshold_percentage: 50.0,
                reset_timeout_ms: 30_000,
                ..BreakerConfig::default()
            },
            publish: BreakerConfig {
                error_threshold_percentage: 30.0,
                reset_timeout_ms: 15_000,
                ..BreakerConfig::default()
            },
            publish_overrides: HashMap::new(),
        }
    }
}

/// Usage event pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Capacity of the fire-and-forget usage channel.
    pub channel_capacity: usize,
    /// Events kept by the in-memory reconciliation sink.
    pub max_events: usize,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            max_events: 10_000,
        }
    }
}

/// Root orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Task queue and workers.
    pub task_pool: PoolConfig,
    /// Competition queue and workers.
    pub competition_pool: PoolConfig,
    /// Finished job records kept for the status endpoints.
    pub max_retained_jobs: usize,
    /// Platforms a task may publish to.
    pub allowed_platforms: Vec<String>,
    /// Idempotency store settings.
    pub idempotency: IdempotencyConfig,
    /// Cost guardrail settings.
    pub cost: CostConfig,
    /// Error-budget gate settings.
    pub error_budget: ErrorBudgetConfig,
    /// Feature flag seeds.
    pub features: FeatureConfig,
    /// Tournament settings.
    pub tournament: TournamentConfig,
    /// Circuit breaker tuning.
    pub breakers: BreakersConfig,
    /// Usage event settings.
    pub usage: UsageConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            task_pool: PoolConfig::default(),
            competition_pool: PoolConfig::default(),
            max_retained_jobs: 1_000,
            allowed_platforms: ["x", "linkedin", "facebook", "instagram", "threads"]
                .into_iter()
                .map(String::from)
                .collect(),
            idempotency: IdempotencyConfig::default(),
            cost: CostConfig::default(),
            error_budget: ErrorBudgetConfig::default(),
            features: FeatureConfig::default(),
            tournament: TournamentConfig::default(),
            breakers: BreakersConfig::default(),
            usage: UsageConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.task_pool
            .validate()
            .map_err(|e| format!("task_pool invalid: {e}"))?;
        self.competition_pool
            .validate()
            .map_err(|e| format!("competition_pool invalid: {e}"))?;
        if self.max_retained_jobs == 0 {
            return Err("max_retained_jobs must be greater than 0".into());
        }
        if self.idempotency.ttl_secs == 0 {
            return Err("idempotency.ttl_secs must be greater than 0".into());
        }
        if self.cost.task_base_cost < 0.0 || self.cost.per_platform_cost < 0.0 {
            return Err("cost estimates must not be negative".into());
        }
        if !(0.0..1.0).contains(&self.error_budget.slo_target) {
            return Err("error_budget.slo_target must be in [0, 1)".into());
        }
        if self.error_budget.window_secs == 0 {
            return Err("error_budget.window_secs must be greater than 0".into());
        }
        for (name, flag) in &self.features.flags {
            if flag.rollout_percentage > 100 {
                return Err(format!("flag `{name}` rollout_percentage exceeds 100"));
            }
        }
        if self.allowed_platforms.is_empty() {
            return Err("allowed_platforms must not be empty".into());
        }
        if self.tournament.competitors.is_empty() {
            return Err("tournament.competitors must not be empty".into());
        }
        self.breakers
            .content
            .validate()
            .map_err(|e| format!("breakers.content invalid: {e}"))?;
        self.breakers
            .publish
            .validate()
            .map_err(|e| format!("breakers.publish invalid: {e}"))?;
        for (platform, breaker) in &self.breakers.publish_overrides {
            if !self.allowed_platforms.contains(platform) {
                return Err(format!(
                    "breakers.publish_overrides names unknown platform `{platform}`"
                ));
            }
            breaker
                .validate()
                .map_err(|e| format!("breakers.publish_overrides.{platform} invalid: {e}"))?;
        }
        if self.usage.channel_capacity == 0 {
            return Err("usage.channel_capacity must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the environment.
    ///
    /// A `.env` file is honoured when present. `ARENA_CONFIG` points at a JSON
    /// file used as the base; `ARENA_BIND_ADDR`, `ARENA_TASK_WORKERS`,
    /// `ARENA_COMPETITION_WORKERS` and `ARENA_DEFAULT_MARGIN` override it.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();

        let mut cfg = match std::env::var("ARENA_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| format!("cannot read config `{path}`: {e}"))?;
                serde_json::from_str(&raw).map_err(|e| format!("parse error: {e}"))?
            }
            Err(_) => Self::default(),
        };

        if let Ok(addr) = std::env::var("ARENA_BIND_ADDR") {
            cfg.server.bind_addr = addr;
        }
        if let Some(workers) = env_parse::<usize>("ARENA_TASK_WORKERS")? {
            cfg.task_pool.workers = workers;
        }
        if let Some(workers) = env_parse::<usize>("ARENA_COMPETITION_WORKERS")? {
            cfg.competition_pool.workers = workers;
        }
        if let Some(margin) = env_parse::<f64>("ARENA_DEFAULT_MARGIN")? {
            cfg.cost.default_margin = margin;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| format!("{name} invalid: {e}")),
        Err(_) => Ok(None),
    }
}
