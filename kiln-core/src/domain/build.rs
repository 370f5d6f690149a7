//! Build domain types
//!
//! A build turns one template snapshot into one machine image. The builder
//! exclusively owns a [`BuildRequest`] and the [`BuildResult`] it produces for
//! the duration of a single build.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::template::Template;

/// Why a build was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    #[default]
    Manual,
    Scheduled,
    Ci,
}

/// Optional network placement for the provisioning target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPlacement {
    pub vpc_id: Option<String>,
    pub subnet_id: Option<String>,
    pub security_group: Option<String>,
}

/// Handle to an allocated provisioning target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub id: String,
    pub region: String,
    pub architecture: String,
}

/// Request to build one template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Unique per invocation
    pub build_id: String,
    pub template_name: String,
    /// Resolved template snapshot; later edits to the template do not affect this build
    pub template: Template,
    pub region: String,
    pub architecture: String,
    /// Explicit version tag; the build id is used when absent
    pub version: Option<String>,
    pub dry_run: bool,
    pub network: NetworkPlacement,
    pub build_type: BuildType,
    /// Parameter overrides; only parameters the template declares are accepted
    pub parameters: BTreeMap<String, String>,
    pub copy_to_regions: Vec<String>,
    pub requested_at: chrono::DateTime<chrono::Utc>,
}

impl BuildRequest {
    pub fn new(
        template: Template,
        region: impl Into<String>,
        architecture: impl Into<String>,
    ) -> Self {
        Self {
            build_id: Self::generate_build_id(&template.name),
            template_name: template.name.clone(),
            template,
            region: region.into(),
            architecture: architecture.into(),
            version: None,
            dry_run: false,
            network: NetworkPlacement::default(),
            build_type: BuildType::Manual,
            parameters: BTreeMap::new(),
            copy_to_regions: Vec::new(),
            requested_at: chrono::Utc::now(),
        }
    }

    /// Generates `<template>-<8 hex chars>`
    pub fn generate_build_id(template_name: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", template_name, &suffix[..8])
    }

    /// Creates a request for another template with the same settings and a fresh build id
    pub fn for_template(&self, template: Template) -> Self {
        Self {
            build_id: Self::generate_build_id(&template.name),
            template_name: template.name.clone(),
            template,
            requested_at: chrono::Utc::now(),
            ..self.clone()
        }
    }

    /// Version recorded for the produced image
    pub fn effective_version(&self) -> String {
        self.version
            .clone()
            .unwrap_or_else(|| self.build_id.clone())
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_network(mut self, network: NetworkPlacement) -> Self {
        self.network = network;
        self
    }

    pub fn with_build_type(mut self, build_type: BuildType) -> Self {
        self.build_type = build_type;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_copy_to_regions(mut self, regions: Vec<String>) -> Self {
        self.copy_to_regions = regions;
        self
    }
}

/// Outcome of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Success,
    Failed,
}

/// Build state machine
///
/// `Pending -> Provisioning -> Building(i) -> Validating(j) -> Finalizing -> Succeeded`,
/// any state `-> Failed`, or `Pending -> DryRunSimulated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BuildState {
    Pending,
    Provisioning,
    Building { step: usize },
    Validating { test: usize },
    Finalizing,
    Succeeded,
    Failed,
    DryRunSimulated,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildState::Pending => write!(f, "pending"),
            BuildState::Provisioning => write!(f, "provisioning"),
            BuildState::Building { step } => write!(f, "building (step {})", step + 1),
            BuildState::Validating { test } => write!(f, "validating (test {})", test + 1),
            BuildState::Finalizing => write!(f, "finalizing"),
            BuildState::Succeeded => write!(f, "succeeded"),
            BuildState::Failed => write!(f, "failed"),
            BuildState::DryRunSimulated => write!(f, "dry run simulated"),
        }
    }
}

/// Pipeline stage named in timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    Provisioning,
    Building,
    Validating,
    Finalizing,
    Capture,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Provisioning => "provisioning",
            BuildStage::Building => "building",
            BuildStage::Validating => "validating",
            BuildStage::Finalizing => "finalizing",
            BuildStage::Capture => "capture",
        };
        f.write_str(name)
    }
}

/// Terminal build failures
///
/// None of these are retried automatically; a retry is a new request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildError {
    #[error("invalid build request: {reason}")]
    InvalidRequest { reason: String },

    #[error("provisioning failed: {reason}")]
    ProvisioningFailure { reason: String },

    #[error("build step '{step_name}' failed ({}): {output}", describe_exit(.exit_code))]
    StepFailure {
        step_name: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("validation test '{test_name}' failed: {reason}")]
    ValidationFailure {
        test_name: String,
        reason: String,
        output: String,
    },

    #[error("finalization failed: {reason}")]
    FinalizationFailure { reason: String },

    #[error("timed out after {limit_secs}s during {stage}{}", describe_subject(.subject))]
    Timeout {
        stage: BuildStage,
        subject: Option<String>,
        limit_secs: u64,
    },

    #[error("instance {instance_id} is {state}, expected running")]
    InvalidState { instance_id: String, state: String },
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit status {}", code),
        None => "no exit status".to_string(),
    }
}

fn describe_subject(subject: &Option<String>) -> String {
    match subject {
        Some(name) => format!(" of '{}'", name),
        None => String::new(),
    }
}

impl BuildError {
    /// Whether the provisioning target is left allocated for inspection
    pub fn preserves_target(&self) -> bool {
        match self {
            BuildError::StepFailure { .. }
            | BuildError::ValidationFailure { .. }
            | BuildError::FinalizationFailure { .. } => true,
            BuildError::Timeout { stage, .. } => matches!(
                stage,
                BuildStage::Building | BuildStage::Validating | BuildStage::Finalizing
            ),
            _ => false,
        }
    }
}

/// Result of a single validation test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub name: String,
    pub passed: bool,
    pub detail: Option<String>,
}

/// Interval during which a live instance was stopped for capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopWindow {
    pub stopped_at: chrono::DateTime<chrono::Utc>,
    /// `None` when the instance could not be restarted
    pub restarted_at: Option<chrono::DateTime<chrono::Utc>>,
    pub elapsed_ms: u64,
}

/// Result of a build or capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub build_id: String,
    pub template_name: String,
    pub version: String,
    pub region: String,
    pub architecture: String,
    pub builder_id: String,
    pub build_type: BuildType,
    pub dry_run: bool,
    pub status: BuildStatus,
    pub state: BuildState,
    pub description: String,
    /// Base image or instance the build started from
    pub source_image: String,
    pub image_id: Option<String>,
    /// Additional region -> region-local image id
    pub copied_images: BTreeMap<String, String>,
    /// Region -> reason, for requested copies that did not complete
    #[serde(default)]
    pub copy_failures: BTreeMap<String, String>,
    pub error_message: Option<String>,
    pub failure: Option<BuildError>,
    pub logs: String,
    pub validation: Vec<ValidationOutcome>,
    /// Target left allocated after a failure; release it with an explicit teardown
    pub preserved_target: Option<TargetRef>,
    pub stop_window: Option<StopWindow>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_ms: u64,
}

impl BuildResult {
    /// Creates a result in the `Pending` state
    pub fn pending(
        build_id: impl Into<String>,
        template_name: impl Into<String>,
        version: impl Into<String>,
        region: impl Into<String>,
        architecture: impl Into<String>,
    ) -> Self {
        Self {
            build_id: build_id.into(),
            template_name: template_name.into(),
            version: version.into(),
            region: region.into(),
            architecture: architecture.into(),
            builder_id: String::new(),
            build_type: BuildType::Manual,
            dry_run: false,
            status: BuildStatus::Failed,
            state: BuildState::Pending,
            description: String::new(),
            source_image: String::new(),
            image_id: None,
            copied_images: BTreeMap::new(),
            copy_failures: BTreeMap::new(),
            error_message: None,
            failure: None,
            logs: String::new(),
            validation: Vec::new(),
            preserved_target: None,
            stop_window: None,
            started_at: chrono::Utc::now(),
            completed_at: None,
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Success
    }

    /// Only real, successful builds that produced an image may be published
    pub fn is_publishable(&self) -> bool {
        self.is_success() && !self.dry_run && self.image_id.is_some()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(name: &str) -> Template {
        Template {
            name: name.to_string(),
            base: "ubuntu:22.04".to_string(),
            description: String::new(),
            version: None,
            architecture: None,
            build_steps: vec![],
            validation: vec![],
            dependencies: vec![],
            parameters: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn test_build_ids_are_unique() {
        let a = BuildRequest::new(template("python"), "us-east-1", "x86_64");
        let b = BuildRequest::new(template("python"), "us-east-1", "x86_64");
        assert_ne!(a.build_id, b.build_id);
        assert!(a.build_id.starts_with("python-"));
        assert_eq!(a.build_id.len(), "python-".len() + 8);
    }

    #[test]
    fn test_effective_version() {
        let request = BuildRequest::new(template("r"), "us-east-1", "x86_64");
        assert_eq!(request.effective_version(), request.build_id);

        let request = request.with_version("1.2.0");
        assert_eq!(request.effective_version(), "1.2.0");
    }

    #[test]
    fn test_for_template_keeps_settings() {
        let request = BuildRequest::new(template("base"), "eu-west-1", "arm64")
            .with_dry_run(true)
            .with_build_type(BuildType::Scheduled);
        let next = request.for_template(template("app"));

        assert_eq!(next.template_name, "app");
        assert_eq!(next.region, "eu-west-1");
        assert!(next.dry_run);
        assert_eq!(next.build_type, BuildType::Scheduled);
        assert_ne!(next.build_id, request.build_id);
    }

    #[test]
    fn test_error_messages_name_the_failure() {
        let err = BuildError::StepFailure {
            step_name: "install".to_string(),
            exit_code: Some(2),
            output: "apt failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "build step 'install' failed (exit status 2): apt failed"
        );

        let err = BuildError::Timeout {
            stage: BuildStage::Validating,
            subject: Some("python".to_string()),
            limit_secs: 60,
        };
        assert_eq!(err.to_string(), "timed out after 60s during validating of 'python'");
    }

    #[test]
    fn test_preserves_target() {
        assert!(
            BuildError::ValidationFailure {
                test_name: "t".to_string(),
                reason: "r".to_string(),
                output: String::new(),
            }
            .preserves_target()
        );
        assert!(
            !BuildError::ProvisioningFailure {
                reason: "quota".to_string()
            }
            .preserves_target()
        );
        assert!(
            !BuildError::Timeout {
                stage: BuildStage::Provisioning,
                subject: None,
                limit_secs: 1,
            }
            .preserves_target()
        );
    }

    #[test]
    fn test_failure_serializes_with_kind() {
        let err = BuildError::InvalidState {
            instance_id: "i-123".to_string(),
            state: "stopped".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "invalid_state");
        assert_eq!(json["instance_id"], "i-123");

        let state = serde_json::to_value(BuildState::Building { step: 2 }).unwrap();
        assert_eq!(state, serde_json::json!({"state": "building", "step": 2}));
    }

    #[test]
    fn test_publishable() {
        let mut result = BuildResult::pending("b", "t", "1.0.0", "us-east-1", "x86_64");
        assert!(!result.is_publishable());

        result.status = BuildStatus::Success;
        result.image_id = Some("img-1".to_string());
        assert!(result.is_publishable());

        result.dry_run = true;
        assert!(!result.is_publishable());
    }
}
