//! Region replicator
//!
//! Copies a finalized image into additional regions. Copies run
//! concurrently and independently: one region failing never cancels the
//! others, and the report carries both the successes and the failures.

use futures::future::join_all;
use kiln_core::domain::registry::RegistryEntry;
use kiln_core::dto::replication::ReplicationReport;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::provider::ImageCopier;

pub struct Replicator {
    copier: Arc<dyn ImageCopier>,
    copy_timeout: Duration,
}

impl Replicator {
    pub fn new(copier: Arc<dyn ImageCopier>, copy_timeout: Duration) -> Self {
        Self {
            copier,
            copy_timeout,
        }
    }

    /// Copies `image_id` from `source_region` into every region in `regions`
    ///
    /// The source region and repeated regions are skipped.
    pub async fn copy_to_regions(
        &self,
        image_id: &str,
        source_region: &str,
        regions: &[String],
    ) -> ReplicationReport {
        let targets: BTreeSet<&str> = regions
            .iter()
            .map(String::as_str)
            .filter(|r| !r.is_empty() && *r != source_region)
            .collect();

        if targets.len() < regions.len() {
            debug!(
                "Skipping {} duplicate or source region(s) for image {}",
                regions.len() - targets.len(),
                image_id
            );
        }
        if targets.is_empty() {
            return ReplicationReport::default();
        }

        info!(
            "Copying image {} from {} to {} region(s)",
            image_id,
            source_region,
            targets.len()
        );

        let copies = targets.into_iter().map(|region| async move {
            let outcome = tokio::time::timeout(
                self.copy_timeout,
                self.copier.copy_image(image_id, source_region, region),
            )
            .await;
            (region, outcome)
        });

        let mut report = ReplicationReport::default();
        for (region, outcome) in join_all(copies).await {
            match outcome {
                Ok(Ok(copied_id)) => {
                    info!("Copied image {} to {}: {}", image_id, region, copied_id);
                    report.copied.insert(region.to_string(), copied_id);
                }
                Ok(Err(e)) => {
                    warn!("Failed to copy image {} to {}: {:#}", image_id, region, e);
                    report.failed.insert(region.to_string(), format!("{:#}", e));
                }
                Err(_) => {
                    let reason = format!(
                        "copy timed out after {}s",
                        self.copy_timeout.as_secs()
                    );
                    warn!("Failed to copy image {} to {}: {}", image_id, region, reason);
                    report.failed.insert(region.to_string(), reason);
                }
            }
        }

        report
    }

    /// Copies a published entry's image into `regions`
    pub async fn replicate_entry(
        &self,
        entry: &RegistryEntry,
        regions: &[String],
    ) -> ReplicationReport {
        self.copy_to_regions(&entry.image_id, &entry.region, regions)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeProvider};

    fn regions(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successes() {
        let provider = Arc::new(FakeProvider::new().failing_region("eu-west-1"));
        let replicator = Replicator::new(provider.clone(), Duration::from_secs(5));

        let report = replicator
            .copy_to_regions("img-1", "us-west-2", &regions(&["us-east-1", "eu-west-1"]))
            .await;

        assert_eq!(
            report.copied.get("us-east-1").map(String::as_str),
            Some("img-1-us-east-1")
        );
        assert!(report.failed.contains_key("eu-west-1"));
        assert!(!report.is_complete());
        // Both copies were attempted
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_skips_source_and_duplicates() {
        let provider = Arc::new(FakeProvider::new());
        let replicator = Replicator::new(provider.clone(), Duration::from_secs(5));

        let report = replicator
            .copy_to_regions(
                "img-1",
                "us-east-1",
                &regions(&["us-east-1", "eu-west-1", "eu-west-1"]),
            )
            .await;

        assert_eq!(report.copied.len(), 1);
        assert!(report.is_complete());
        assert_eq!(
            provider.calls(),
            vec![Call::CopyImage {
                image: "img-1".to_string(),
                to: "eu-west-1".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_no_regions() {
        let provider = Arc::new(FakeProvider::new());
        let replicator = Replicator::new(provider.clone(), Duration::from_secs(5));

        let report = replicator.copy_to_regions("img-1", "us-east-1", &[]).await;
        assert_eq!(report, ReplicationReport::default());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_replicate_entry_uses_entry_region() {
        let provider = Arc::new(FakeProvider::new());
        let replicator = Replicator::new(provider.clone(), Duration::from_secs(5));
        let now = chrono::Utc::now();
        let entry = RegistryEntry {
            template_name: "r".to_string(),
            version: "1.0.0".to_string(),
            image_id: "img-9".to_string(),
            region: "ap-south-1".to_string(),
            architecture: "x86_64".to_string(),
            build_id: "r-1".to_string(),
            built_at: now,
            published_at: now,
            published_by: "ci".to_string(),
            description: String::new(),
            copied_from: None,
        };

        let report = replicator
            .replicate_entry(&entry, &regions(&["ap-south-1", "us-east-1"]))
            .await;
        assert_eq!(report.copied.keys().collect::<Vec<_>>(), vec!["us-east-1"]);
    }
}
