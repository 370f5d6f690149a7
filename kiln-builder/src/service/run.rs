//! Per-run bookkeeping shared by builds and captures

use kiln_core::domain::build::{BuildError, BuildResult, BuildStage, BuildState, BuildStatus, TargetRef};
use kiln_core::domain::log::LogLevel;
use kiln_core::dto::replication::{ReplicationError, ReplicationReport};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::service::log_buffer::{InMemoryLogBuffer, LogBufferService};

/// Mutable state of one build or capture in progress
pub(crate) struct BuildRun {
    pub(crate) result: BuildResult,
    log: InMemoryLogBuffer,
    started: Instant,
}

impl BuildRun {
    pub(crate) fn start(result: BuildResult) -> Self {
        Self {
            result,
            log: InMemoryLogBuffer::new(),
            started: Instant::now(),
        }
    }

    pub(crate) fn enter(&mut self, state: BuildState) {
        info!("Build {}: {}", self.result.build_id, state);
        self.result.state = state;
    }

    pub(crate) fn log(&self, level: LogLevel, message: String) {
        self.log.record(level, message);
    }

    pub(crate) fn preserve(&mut self, target: TargetRef) {
        warn!(
            "Build {}: target {} preserved for inspection",
            self.result.build_id, target.id
        );
        self.log(
            LogLevel::Warning,
            format!(
                "Target {} left allocated for inspection; tear it down explicitly when done",
                target.id
            ),
        );
        self.result.preserved_target = Some(target);
    }

    /// Attaches region copies and the regions that could not be copied
    pub(crate) fn record_replication(&mut self, report: ReplicationReport) {
        for (region, copied) in &report.copied {
            self.log(LogLevel::Info, format!("Copied to {}: {}", region, copied));
        }
        for (region, reason) in &report.failed {
            self.log(
                LogLevel::Warning,
                format!("Copy to {} failed: {}", region, reason),
            );
        }
        match report.into_result() {
            Ok(copied) => self.result.copied_images = copied,
            Err(partial) => {
                warn!("Build {}: {}", self.result.build_id, partial);
                let ReplicationError::PartialFailure { copied, failed } = partial;
                self.result.copied_images = copied;
                self.result.copy_failures = failed;
            }
        }
    }

    pub(crate) fn fail(mut self, failure: BuildError) -> BuildResult {
        error!("Build {} failed: {}", self.result.build_id, failure);
        self.log(LogLevel::Error, format!("Build failed: {}", failure));
        self.result.error_message = Some(failure.to_string());
        self.result.failure = Some(failure);
        self.finish(BuildStatus::Failed, BuildState::Failed)
    }

    pub(crate) fn finish(mut self, status: BuildStatus, state: BuildState) -> BuildResult {
        self.enter(state);
        self.result.status = status;
        self.result.completed_at = Some(chrono::Utc::now());
        self.result.duration_ms = self.started.elapsed().as_millis() as u64;
        self.result.logs = self.log.render();
        self.result
    }
}

/// Runs `operation` with a bound; elapsed bounds become [`BuildError::Timeout`]
pub(crate) async fn bounded<T>(
    limit: Duration,
    stage: BuildStage,
    subject: Option<&str>,
    operation: impl Future<Output = anyhow::Result<T>>,
) -> Result<anyhow::Result<T>, BuildError> {
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| BuildError::Timeout {
            stage,
            subject: subject.map(str::to_string),
            limit_secs: limit.as_secs(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn run() -> BuildRun {
        BuildRun::start(BuildResult::pending("b-1", "t", "1.0.0", "us-east-1", "x86_64"))
    }

    #[test]
    fn test_fail_records_error_and_logs() {
        let result = run().fail(BuildError::FinalizationFailure {
            reason: "quota".to_string(),
        });

        assert_eq!(result.status, BuildStatus::Failed);
        assert_eq!(result.state, BuildState::Failed);
        assert_eq!(result.error_message.as_deref(), Some("finalization failed: quota"));
        assert!(result.logs.contains("ERROR Build failed: finalization failed: quota"));
        assert!(result.completed_at.is_some());
    }

    #[test]
    fn test_record_replication_keeps_copies_and_failures() {
        let mut run = run();
        run.record_replication(ReplicationReport {
            copied: BTreeMap::from([("eu-west-1".to_string(), "img-eu".to_string())]),
            failed: BTreeMap::from([("ap-south-1".to_string(), "denied".to_string())]),
        });
        let result = run.finish(BuildStatus::Success, BuildState::Succeeded);

        assert_eq!(result.copied_images.len(), 1);
        assert_eq!(
            result.copy_failures,
            BTreeMap::from([("ap-south-1".to_string(), "denied".to_string())])
        );
        assert!(result.logs.contains("Copy to ap-south-1 failed: denied"));
    }

    #[test]
    fn test_complete_replication_records_no_failures() {
        let mut run = run();
        run.record_replication(ReplicationReport {
            copied: BTreeMap::from([("eu-west-1".to_string(), "img-eu".to_string())]),
            failed: BTreeMap::new(),
        });
        let result = run.finish(BuildStatus::Success, BuildState::Succeeded);

        assert_eq!(result.copied_images["eu-west-1"], "img-eu");
        assert!(result.copy_failures.is_empty());
    }

    #[tokio::test]
    async fn test_bounded_maps_elapsed_to_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), anyhow::Error>(())
        };
        let outcome = bounded(Duration::from_millis(10), BuildStage::Capture, Some("stop"), slow).await;

        assert_eq!(
            outcome.err(),
            Some(BuildError::Timeout {
                stage: BuildStage::Capture,
                subject: Some("stop".to_string()),
                limit_secs: 0,
            })
        );
    }
}
