//! Configuration models for queues, gates, breakers, and the HTTP server.

pub mod orchestrator;

pub use orchestrator::{
    BreakersConfig, CostConfig, ErrorBudgetConfig, FeatureConfig, FlagConfig, IdempotencyConfig,
    OrchestratorConfig, PoolConfig, ServerConfig, TournamentConfig, UsageConfig,
    WinRateDeltaConfig,
};
