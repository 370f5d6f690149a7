//! Builder services

pub mod capture;
pub mod log_buffer;
pub mod orchestrator;
pub mod replicator;
mod run;

pub use capture::CaptureService;
pub use log_buffer::{InMemoryLogBuffer, LogBufferService};
pub use orchestrator::Orchestrator;
pub use replicator::Replicator;
