//! In-process collaborator implementations.
//!
//! Deterministic stand-ins for the content, publishing and pipeline services
//! so the orchestrator runs end-to-end without network dependencies.

pub mod content;
pub mod pipeline;
pub mod publisher;

pub use content::StubContentGenerator;
pub use pipeline::LoggingPipelineSync;
pub use publisher::StubPublisher;
