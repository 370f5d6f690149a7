//! Provider contracts
//!
//! The orchestrator, replicator and capture service only talk to compute
//! through these traits, so any provider implementing them is substitutable.
//! Methods block until the remote operation completes; callers bound every
//! call with a timeout.

use anyhow::Result;
use async_trait::async_trait;
use kiln_core::domain::build::{NetworkPlacement, TargetRef};
use std::fmt;
use std::time::Duration;

/// Exit status and captured output of a remote script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    pub exit_code: i32,
    /// Combined stdout and stderr
    pub output: String,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Ephemeral compute used to run build steps before image capture
#[async_trait]
pub trait ProvisioningTarget: Send + Sync {
    /// Allocates a target from `base_image`
    async fn allocate(
        &self,
        base_image: &str,
        region: &str,
        architecture: &str,
        network: &NetworkPlacement,
    ) -> Result<TargetRef>;

    /// Waits until the target accepts scripts
    async fn wait_ready(&self, target: &TargetRef) -> Result<()>;

    /// Runs a script on the target
    ///
    /// A non-zero exit is reported through [`ScriptOutput`], not as an error;
    /// errors mean the script could not be run at all.
    async fn run_script(
        &self,
        target: &TargetRef,
        script: &str,
        timeout: Duration,
    ) -> Result<ScriptOutput>;

    /// Captures the target as a durable image and returns its id
    async fn capture_image(&self, target: &TargetRef, image_name: &str) -> Result<String>;

    /// Releases the target
    async fn release(&self, target: &TargetRef) -> Result<()>;
}

/// Lifecycle state of a long-running instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    Terminated,
    Other(String),
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Pending => write!(f, "pending"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Stopping => write!(f, "stopping"),
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Terminated => write!(f, "terminated"),
            InstanceState::Other(state) => write!(f, "{}", state),
        }
    }
}

/// What [`InstanceControl::describe`] reports about an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    pub id: String,
    pub state: InstanceState,
    pub architecture: String,
    /// Image the instance was launched from
    pub source_image: String,
}

/// Control over an existing, long-running instance
#[async_trait]
pub trait InstanceControl: Send + Sync {
    async fn describe(&self, instance_id: &str) -> Result<InstanceDescription>;

    /// Stops the instance and waits until it is stopped
    async fn stop(&self, instance_id: &str) -> Result<()>;

    /// Starts the instance and waits until it is running
    async fn start(&self, instance_id: &str) -> Result<()>;

    /// Creates an image from the (stopped) instance and returns its id
    async fn create_image(&self, instance_id: &str, image_name: &str, description: &str)
    -> Result<String>;
}

/// Copies a finalized image between regions
#[async_trait]
pub trait ImageCopier: Send + Sync {
    /// Returns the region-local id of the copy
    async fn copy_image(
        &self,
        image_id: &str,
        source_region: &str,
        target_region: &str,
    ) -> Result<String>;
}
