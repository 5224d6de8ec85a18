//! Builders to construct the orchestrator from configuration.

pub mod orchestrator_builder;

pub use orchestrator_builder::{BuildError, OrchestratorBuilder};
