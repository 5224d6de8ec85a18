//! # Prometheus Arena
//!
//! Admission-and-execution orchestrator for the Prometheus AI Platform.
//!
//! Clients submit two kinds of work: single **tasks** (analyze text, then
//! publish it to social platforms) and **self-compete tournaments** (run the
//! same task through several variants, score them, pick a champion). Every
//! submission passes a chain of gates before it is queued:
//!
//! 1. payload validation and tenant resolution
//! 2. idempotency: one job per `(tenant, key)`, concurrent duplicates collapse
//! 3. cost margin: forecast spend must fit the tenant's remaining margin
//! 4. error budget: a global burn rate of `1.0` or more refuses all work
//! 5. feature gate: the tenant must be in the kind's percentage rollout
//!
//! Admitted jobs land in a priority queue per kind and are drained by a
//! tokio worker pool with bounded retries and exponential backoff. Calls to
//! external collaborators go through per-target circuit breakers with
//! fallbacks. Results are kept in a bounded mailbox for the status endpoints.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_arena::builders::OrchestratorBuilder;
//! use prometheus_arena::config::OrchestratorConfig;
//! use prometheus_arena::core::{JobPayload, SubmitRequest, TaskPayload};
//!
//! let orchestrator = OrchestratorBuilder::new(OrchestratorConfig::default()).build()?;
//! let accepted = orchestrator
//!     .submit(
//!         SubmitRequest::new(
//!             "tenant-a",
//!             JobPayload::Task(TaskPayload {
//!                 text: "Launch day!".into(),
//!                 platforms: vec!["x".into()],
//!                 tags: vec![],
//!             }),
//!         )
//!         .with_idempotency_key("launch-1"),
//!     )
//!     .await?;
//! let record = orchestrator.status(accepted.id);
//! ```
//!
//! The HTTP surface lives in [`runtime::api`]; `src/main.rs` wires it up.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Admission gates, scheduling, execution, and tournaments.
pub mod core;
/// Configuration models and loaders.
pub mod config;
/// Builders that assemble the orchestrator from configuration.
pub mod builders;
/// In-process collaborator adapters.
pub mod infra;
/// The running orchestrator and its HTTP API.
pub mod runtime;
/// Clock, telemetry, and metrics helpers.
pub mod util;
