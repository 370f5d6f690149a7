//! Build orchestrator
//!
//! Drives one template through the build pipeline:
//!
//! `Pending -> Provisioning -> Building(i) -> Validating(j) -> Finalizing -> Succeeded`
//!
//! Any stage may end in `Failed`; a dry run goes straight from `Pending` to
//! `DryRunSimulated` without touching the provider. Steps and tests run one
//! at a time in template order, and every remote call is bounded by a
//! timeout from [`BuilderConfig`].
//!
//! Failures are terminal and never retried here. A target that has started
//! running steps is preserved on failure so it can be inspected; it is only
//! released automatically after the image has been captured.

use anyhow::Context;
use kiln_core::domain::build::{
    BuildError, BuildRequest, BuildResult, BuildStage, BuildState, BuildStatus, TargetRef,
    ValidationOutcome,
};
use kiln_core::domain::log::LogLevel;
use kiln_core::domain::template::Template;
use kiln_core::domain::version::VersionInfo;
use kiln_template::render::{render_template, resolve_parameters};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BuilderConfig;
use crate::provider::{ImageCopier, ProvisioningTarget};
use crate::service::replicator::Replicator;
use crate::service::run::{BuildRun, bounded};

/// Lines of step output kept in error messages
const OUTPUT_TAIL_LINES: usize = 20;

pub struct Orchestrator {
    config: BuilderConfig,
    target: Arc<dyn ProvisioningTarget>,
    replicator: Option<Replicator>,
}

fn begin(request: &BuildRequest, builder_id: &str) -> BuildRun {
    let mut result = BuildResult::pending(
        &request.build_id,
        &request.template_name,
        request.effective_version(),
        &request.region,
        &request.architecture,
    );
    result.builder_id = builder_id.to_string();
    result.build_type = request.build_type;
    result.dry_run = request.dry_run;
    result.description = request.template.description.clone();
    result.source_image = request.template.base.clone();
    BuildRun::start(result)
}

/// Last lines of a script's output, for error messages
fn output_tail(output: &str) -> String {
    let lines: Vec<&str> = output.trim_end().lines().collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join("\n")
}

impl Orchestrator {
    pub fn new(config: BuilderConfig, target: Arc<dyn ProvisioningTarget>) -> Self {
        Self {
            config,
            target,
            replicator: None,
        }
    }

    /// Enables copying finished images to `BuildRequest::copy_to_regions`
    pub fn with_copier(mut self, copier: Arc<dyn ImageCopier>) -> Self {
        self.replicator = Some(Replicator::new(copier, self.config.copy_timeout));
        self
    }

    /// Executes one build
    ///
    /// Build failures are reported through the returned result, never as a
    /// panic or an early return; the result always carries the build log.
    pub async fn build(&self, request: BuildRequest) -> BuildResult {
        let run = begin(&request, &self.config.builder_id);
        run.log(
            LogLevel::Info,
            format!(
                "Build {} of '{}' for {}/{} ({:?})",
                request.build_id,
                request.template_name,
                request.region,
                request.architecture,
                request.build_type
            ),
        );

        let template = match self.prepare(&request) {
            Ok(template) => template,
            Err(e) => return run.fail(e),
        };

        if request.dry_run {
            return self.simulate(run, &request, &template);
        }

        self.execute(run, &request, &template).await
    }

    /// Builds a resolved plan in order, stopping at the first failure
    ///
    /// `request` describes the build of the plan's last template (the
    /// target); earlier templates reuse its region, architecture, network and
    /// copy settings with their own version and default parameters.
    pub async fn build_plan(&self, plan: &[Template], request: &BuildRequest) -> Vec<BuildResult> {
        let mut results = Vec::with_capacity(plan.len());

        for (index, template) in plan.iter().enumerate() {
            let mut next = request.for_template(template.clone());
            if index + 1 < plan.len() {
                next.version = template.version.clone();
                next.parameters.clear();
            }

            let result = self.build(next).await;
            let failed = !result.is_success();
            results.push(result);

            if failed {
                warn!(
                    "Stopping plan after '{}' failed; {} template(s) not built",
                    template.name,
                    plan.len() - index - 1
                );
                break;
            }
        }

        results
    }

    /// Releases a target preserved by a failed build
    pub async fn teardown(&self, target: &TargetRef) -> anyhow::Result<()> {
        info!("Tearing down target {}", target.id);
        tokio::time::timeout(self.config.provision_timeout, self.target.release(target))
            .await
            .with_context(|| format!("Timed out releasing target {}", target.id))?
            .with_context(|| format!("Failed to release target {}", target.id))
    }

    /// Validates the request and renders parameters into the template's scripts
    ///
    /// Runs before any provider call so invalid requests never allocate anything.
    fn prepare(&self, request: &BuildRequest) -> Result<Template, BuildError> {
        let invalid = |reason: String| BuildError::InvalidRequest { reason };
        let template = &request.template;

        if request.region.trim().is_empty() {
            return Err(invalid("region is required".to_string()));
        }
        if request.architecture.trim().is_empty() {
            return Err(invalid("architecture is required".to_string()));
        }
        if request.template_name != template.name {
            return Err(invalid(format!(
                "request names template '{}' but carries '{}'",
                request.template_name, template.name
            )));
        }
        if template.build_steps.is_empty() {
            return Err(invalid(format!(
                "template '{}' has no build steps",
                template.name
            )));
        }
        if !template.supports_architecture(&request.architecture) {
            return Err(invalid(format!(
                "template '{}' cannot be built for {}",
                template.name, request.architecture
            )));
        }
        if let Some(version) = &request.version {
            VersionInfo::parse(version).map_err(|e| invalid(e.to_string()))?;
        }

        let values = resolve_parameters(template, &request.parameters)
            .map_err(|e| invalid(e.to_string()))?;

        Ok(render_template(template, &values))
    }

    fn simulate(&self, run: BuildRun, request: &BuildRequest, template: &Template) -> BuildResult {
        let dry = |run: &BuildRun, message: String| {
            run.log(LogLevel::Info, format!("[dry run] {}", message))
        };

        dry(
            &run,
            format!(
                "Provisioning: would allocate a target from '{}' in {}/{}{}",
                template.base,
                request.region,
                request.architecture,
                describe_network(request)
            ),
        );

        for (i, step) in template.build_steps.iter().enumerate() {
            dry(
                &run,
                format!(
                    "Building: would run step {}/{} '{}'",
                    i + 1,
                    template.build_steps.len(),
                    step.name
                ),
            );
            run.log(LogLevel::Debug, step.script.clone());
        }

        for (j, test) in template.validation.iter().enumerate() {
            dry(
                &run,
                format!(
                    "Validating: would run test {}/{} '{}'",
                    j + 1,
                    template.validation.len(),
                    test.name
                ),
            );
            run.log(LogLevel::Debug, test.script.clone());
        }

        dry(
            &run,
            format!("Finalizing: would capture image '{}'", image_name(request)),
        );

        if !request.copy_to_regions.is_empty() {
            dry(
                &run,
                format!(
                    "Replicating: would copy to {}",
                    request.copy_to_regions.join(", ")
                ),
            );
        }

        run.finish(BuildStatus::Success, BuildState::DryRunSimulated)
    }

    async fn execute(&self, mut run: BuildRun, request: &BuildRequest, template: &Template) -> BuildResult {
        // Provisioning
        run.enter(BuildState::Provisioning);
        run.log(
            LogLevel::Info,
            format!(
                "Allocating target from '{}' in {}/{}{}",
                template.base,
                request.region,
                request.architecture,
                describe_network(request)
            ),
        );

        let provision_limit = self.config.provision_timeout;
        let allocation = self.target.allocate(
            &template.base,
            &request.region,
            &request.architecture,
            &request.network,
        );
        let target = match bounded(provision_limit, BuildStage::Provisioning, None, allocation).await {
            Ok(Ok(target)) => target,
            Ok(Err(e)) => {
                return run.fail(BuildError::ProvisioningFailure {
                    reason: format!("{:#}", e),
                });
            }
            Err(timeout) => return run.fail(timeout),
        };
        run.log(LogLevel::Info, format!("Allocated target {}", target.id));

        let ready = bounded(
            provision_limit,
            BuildStage::Provisioning,
            None,
            self.target.wait_ready(&target),
        )
        .await;
        let not_ready = match ready {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(BuildError::ProvisioningFailure {
                reason: format!("target {} never became ready: {:#}", target.id, e),
            }),
            Err(timeout) => Some(timeout),
        };
        if let Some(failure) = not_ready {
            return self.abandon(run, target, failure).await;
        }

        // Building
        let total = template.build_steps.len();
        for (i, step) in template.build_steps.iter().enumerate() {
            run.enter(BuildState::Building { step: i });
            run.log(
                LogLevel::Info,
                format!("Running step {}/{}: {}", i + 1, total, step.name),
            );

            let limit = step
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(self.config.default_step_timeout);
            let execution = self.target.run_script(&target, &step.script, limit);

            let outcome = bounded(limit, BuildStage::Building, Some(&step.name), execution).await;
            let failure = match outcome {
                Ok(Ok(output)) if output.success() => {
                    if !output.output.trim().is_empty() {
                        run.log(LogLevel::Debug, output.output.trim_end().to_string());
                    }
                    run.log(LogLevel::Info, format!("Step '{}' completed", step.name));
                    None
                }
                Ok(Ok(output)) => {
                    run.log(LogLevel::Error, output.output.trim_end().to_string());
                    Some(BuildError::StepFailure {
                        step_name: step.name.clone(),
                        exit_code: Some(output.exit_code),
                        output: output_tail(&output.output),
                    })
                }
                Ok(Err(e)) => Some(BuildError::StepFailure {
                    step_name: step.name.clone(),
                    exit_code: None,
                    output: format!("{:#}", e),
                }),
                Err(timeout) => Some(timeout),
            };

            if let Some(failure) = failure {
                return self.abandon(run, target, failure).await;
            }
        }

        // Validating
        let total = template.validation.len();
        for (j, test) in template.validation.iter().enumerate() {
            run.enter(BuildState::Validating { test: j });
            run.log(
                LogLevel::Info,
                format!("Running validation {}/{}: {}", j + 1, total, test.name),
            );

            let limit = self.config.validation_timeout;
            let execution = self.target.run_script(&target, &test.script, limit);

            let outcome = bounded(limit, BuildStage::Validating, Some(&test.name), execution).await;
            let verdict = match outcome {
                Ok(Ok(output)) => match test.check(output.exit_code, &output.output) {
                    Ok(()) => Ok(()),
                    Err(reason) => Err(BuildError::ValidationFailure {
                        test_name: test.name.clone(),
                        reason,
                        output: output_tail(&output.output),
                    }),
                },
                Ok(Err(e)) => Err(BuildError::ValidationFailure {
                    test_name: test.name.clone(),
                    reason: format!("{:#}", e),
                    output: String::new(),
                }),
                Err(timeout) => Err(timeout),
            };

            match verdict {
                Ok(()) => {
                    run.log(LogLevel::Info, format!("Validation '{}' passed", test.name));
                    run.result.validation.push(ValidationOutcome {
                        name: test.name.clone(),
                        passed: true,
                        detail: None,
                    });
                }
                Err(failure) => {
                    run.result.validation.push(ValidationOutcome {
                        name: test.name.clone(),
                        passed: false,
                        detail: Some(failure.to_string()),
                    });
                    return self.abandon(run, target, failure).await;
                }
            }
        }
        if total > 0 {
            run.log(
                LogLevel::Info,
                format!("All validation tests passed ({}/{})", total, total),
            );
        }

        // Finalizing
        run.enter(BuildState::Finalizing);
        let name = image_name(request);
        run.log(LogLevel::Info, format!("Capturing image '{}'", name));

        let capture = self.target.capture_image(&target, &name);
        let captured = bounded(self.config.capture_timeout, BuildStage::Finalizing, None, capture).await;
        let image_id = match captured {
            Ok(Ok(image_id)) => image_id,
            Ok(Err(e)) => {
                let failure = BuildError::FinalizationFailure {
                    reason: format!("{:#}", e),
                };
                return self.abandon(run, target, failure).await;
            }
            Err(timeout) => return self.abandon(run, target, timeout).await,
        };
        run.log(LogLevel::Info, format!("Image captured: {}", image_id));
        run.result.image_id = Some(image_id.clone());

        let release = self.target.release(&target);
        let released = bounded(provision_limit, BuildStage::Finalizing, None, release).await;
        match released {
            Ok(Ok(())) => {
                run.log(LogLevel::Info, format!("Released target {}", target.id));
            }
            Ok(Err(e)) => {
                warn!("Failed to release target {}: {:#}", target.id, e);
                run.log(
                    LogLevel::Warning,
                    format!("Failed to release target {}: {:#}", target.id, e),
                );
                run.preserve(target);
            }
            Err(timeout) => {
                warn!("Failed to release target {}: {}", target.id, timeout);
                run.log(
                    LogLevel::Warning,
                    format!("Failed to release target {}: {}", target.id, timeout),
                );
                run.preserve(target);
            }
        }

        self.replicate(&mut run, request, &image_id).await;

        run.finish(BuildStatus::Success, BuildState::Succeeded)
    }

    /// Fails the run, keeping `target` when the failure calls for inspection
    /// and releasing it otherwise
    async fn abandon(&self, mut run: BuildRun, target: TargetRef, failure: BuildError) -> BuildResult {
        if failure.preserves_target() {
            run.preserve(target);
        } else {
            debug!("Releasing partially provisioned target {}", target.id);
            if let Err(e) = self.teardown(&target).await {
                warn!("{:#}", e);
                run.log(LogLevel::Warning, format!("{:#}", e));
            }
        }
        run.fail(failure)
    }

    async fn replicate(&self, run: &mut BuildRun, request: &BuildRequest, image_id: &str) {
        if request.copy_to_regions.is_empty() {
            return;
        }

        let Some(replicator) = &self.replicator else {
            run.log(
                LogLevel::Warning,
                "No image copier configured; skipping region copies".to_string(),
            );
            return;
        };

        let report = replicator
            .copy_to_regions(image_id, &request.region, &request.copy_to_regions)
            .await;

        run.record_replication(report);
    }
}

fn image_name(request: &BuildRequest) -> String {
    format!(
        "{}-{}-{}",
        request.template_name,
        request.effective_version(),
        request.architecture
    )
}

fn describe_network(request: &BuildRequest) -> String {
    let mut parts = Vec::new();
    if let Some(vpc) = &request.network.vpc_id {
        parts.push(format!("vpc {}", vpc));
    }
    if let Some(subnet) = &request.network.subnet_id {
        parts.push(format!("subnet {}", subnet));
    }
    if let Some(group) = &request.network.security_group {
        parts.push(format!("security group {}", group));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}
