//! Instance-to-template capture
//!
//! Turns a live instance into a new baseline image:
//! stop -> create image -> restart -> optional region copies.
//!
//! The instance is stopped so the image reflects a consistent filesystem.
//! If the process dies or the capture is cancelled between stop and restart,
//! the instance stays stopped. That risk is logged up front and never
//! papered over with retries.

use kiln_core::domain::build::{
    BuildError, BuildRequest, BuildResult, BuildStage, BuildState, BuildStatus, StopWindow,
};
use kiln_core::domain::log::LogLevel;
use kiln_core::domain::version::VersionInfo;
use kiln_core::dto::capture::CaptureRequest;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::BuilderConfig;
use crate::provider::{ImageCopier, InstanceControl, InstanceState};
use crate::service::replicator::Replicator;
use crate::service::run::{BuildRun, bounded};

pub struct CaptureService {
    config: BuilderConfig,
    control: Arc<dyn InstanceControl>,
    replicator: Option<Replicator>,
}

impl CaptureService {
    pub fn new(config: BuilderConfig, control: Arc<dyn InstanceControl>) -> Self {
        Self {
            config,
            control,
            replicator: None,
        }
    }

    /// Enables copying captured images to `CaptureRequest::copy_to_regions`
    pub fn with_copier(mut self, copier: Arc<dyn ImageCopier>) -> Self {
        self.replicator = Some(Replicator::new(copier, self.config.copy_timeout));
        self
    }

    /// Captures a running instance as a new image
    ///
    /// Fails with [`BuildError::InvalidState`] unless the instance is running.
    /// The result's `stop_window` records how long the instance was down.
    pub async fn capture_from_running(&self, request: CaptureRequest) -> BuildResult {
        let build_id = BuildRequest::generate_build_id(&request.template_name);
        let version = request.version.clone().unwrap_or_else(|| build_id.clone());
        let mut result = BuildResult::pending(
            &build_id,
            &request.template_name,
            version,
            &request.region,
            &self.config.default_architecture,
        );
        result.builder_id = self.config.builder_id.clone();
        result.description = request.description.clone();

        let mut run = BuildRun::start(result);
        run.log(
            LogLevel::Info,
            format!(
                "Capturing instance {} as '{}' in {}",
                request.instance_id, request.template_name, request.region
            ),
        );

        if let Err(e) = check_request(&request) {
            return run.fail(e);
        }

        // Precondition
        let id = request.instance_id.as_str();
        let described = bounded(
            self.config.provision_timeout,
            BuildStage::Capture,
            Some("describe"),
            self.control.describe(id),
        )
        .await;
        let instance = match described {
            Ok(Ok(instance)) => instance,
            Ok(Err(e)) => {
                return run.fail(BuildError::FinalizationFailure {
                    reason: format!("could not describe instance {}: {:#}", id, e),
                });
            }
            Err(timeout) => return run.fail(timeout),
        };
        if instance.state != InstanceState::Running {
            return run.fail(BuildError::InvalidState {
                instance_id: id.to_string(),
                state: instance.state.to_string(),
            });
        }
        if !instance.architecture.is_empty() {
            run.result.architecture = instance.architecture.clone();
        }
        run.result.source_image = instance.source_image.clone();

        run.enter(BuildState::Finalizing);

        // Stop
        warn!(
            "Stopping instance {} for capture; if this process is interrupted the instance may remain stopped",
            id
        );
        run.log(
            LogLevel::Warning,
            format!(
                "Stopping instance {}. If the capture is interrupted the instance may remain stopped and must be started by hand",
                id
            ),
        );
        let stopped = bounded(
            self.config.capture_timeout,
            BuildStage::Capture,
            Some("stop"),
            self.control.stop(id),
        )
        .await;
        let stop_failure = match stopped {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(BuildError::FinalizationFailure {
                reason: format!("could not stop instance {}: {:#}", id, e),
            }),
            Err(timeout) => Some(timeout),
        };
        if let Some(failure) = stop_failure {
            run.log(
                LogLevel::Warning,
                format!("Check the state of instance {}; it may be stopped", id),
            );
            return run.fail(failure);
        }
        let stopped_at = chrono::Utc::now();
        let stop_clock = Instant::now();
        run.log(LogLevel::Info, format!("Instance {} stopped", id));

        // Create image
        let name = format!(
            "{}-{}-{}",
            request.template_name, run.result.version, run.result.architecture
        );
        run.log(LogLevel::Info, format!("Creating image '{}'", name));
        let created = bounded(
            self.config.capture_timeout,
            BuildStage::Capture,
            Some("create image"),
            self.control.create_image(id, &name, &request.description),
        )
        .await;

        // Restart, whether or not the image was created
        let restarted = bounded(
            self.config.provision_timeout,
            BuildStage::Capture,
            Some("restart"),
            self.control.start(id),
        )
        .await;
        let restarted_at = match restarted {
            Ok(Ok(())) => {
                run.log(LogLevel::Info, format!("Instance {} restarted", id));
                Some(chrono::Utc::now())
            }
            Ok(Err(e)) => {
                warn!("Failed to restart instance {}: {:#}", id, e);
                run.log(
                    LogLevel::Warning,
                    format!("Instance {} is still stopped: restart failed: {:#}", id, e),
                );
                None
            }
            Err(timeout) => {
                warn!("Failed to restart instance {}: {}", id, timeout);
                run.log(
                    LogLevel::Warning,
                    format!("Instance {} may still be stopped: {}", id, timeout),
                );
                None
            }
        };
        run.result.stop_window = Some(StopWindow {
            stopped_at,
            restarted_at,
            elapsed_ms: stop_clock.elapsed().as_millis() as u64,
        });

        let image_id = match created {
            Ok(Ok(image_id)) => image_id,
            Ok(Err(e)) => {
                return run.fail(BuildError::FinalizationFailure {
                    reason: format!("could not create image from {}: {:#}", id, e),
                });
            }
            Err(timeout) => return run.fail(timeout),
        };
        info!("Captured instance {} as {}", id, image_id);
        run.log(LogLevel::Info, format!("Image created: {}", image_id));
        run.result.image_id = Some(image_id.clone());

        // Replicate
        if !request.copy_to_regions.is_empty() {
            match &self.replicator {
                Some(replicator) => {
                    let report = replicator
                        .copy_to_regions(&image_id, &request.region, &request.copy_to_regions)
                        .await;
                    run.record_replication(report);
                }
                None => run.log(
                    LogLevel::Warning,
                    "No image copier configured; skipping region copies".to_string(),
                ),
            }
        }

        run.finish(BuildStatus::Success, BuildState::Succeeded)
    }
}

fn check_request(request: &CaptureRequest) -> Result<(), BuildError> {
    let invalid = |reason: &str| BuildError::InvalidRequest {
        reason: reason.to_string(),
    };

    if request.instance_id.trim().is_empty() {
        return Err(invalid("instance id is required"));
    }
    if request.template_name.trim().is_empty() {
        return Err(invalid("template name is required"));
    }
    if request.region.trim().is_empty() {
        return Err(invalid("region is required"));
    }
    if let Some(version) = &request.version {
        VersionInfo::parse(version).map_err(|e| BuildError::InvalidRequest {
            reason: e.to_string(),
        })?;
    }
    Ok(())
}
