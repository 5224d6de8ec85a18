//! Infrastructure adapters for external collaborators.

pub mod collaborators;

pub use collaborators::{LoggingPipelineSync, StubContentGenerator, StubPublisher};
