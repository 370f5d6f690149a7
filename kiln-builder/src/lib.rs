//! Kiln Builder
//!
//! Drives template builds against a provisioning target and turns running
//! instances into new baseline images.
//!
//! Architecture:
//! - Configuration: timeouts and defaults, from environment or defaults
//! - Providers: traits for compute, instance control and image copies,
//!   with a podman-backed implementation
//! - Services: the build orchestrator, region replicator, instance capture
//!   and per-build log buffering

pub mod config;
pub mod definition;
pub mod podman;
pub mod provider;
pub mod service;

#[cfg(test)]
mod testing;

pub use config::BuilderConfig;
pub use definition::{SavedImageDefinition, render_definition};
pub use provider::{ImageCopier, InstanceControl, ProvisioningTarget, ScriptOutput};
pub use service::{CaptureService, Orchestrator, Replicator};
