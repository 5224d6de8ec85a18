//! The running orchestrator and its HTTP surface.

pub mod api;
pub mod orchestrator;
pub mod server;

pub use api::{router, ApiError, AppState};
pub use orchestrator::{Orchestrator, OrchestratorStats};
pub use server::serve;
