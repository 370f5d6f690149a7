//! Registry service
//!
//! Publishes build results and answers version queries. Entries are stored as
//! JSON values under `{prefix}/{template}/{region}/{architecture}/version/{version}`.
//!
//! Publishing never overwrites: the parameter store's insert-if-absent is the
//! only duplicate guard, so concurrent publishes of different keys need no
//! coordination and concurrent publishes of one key have a single winner.
//! A version and its regional copies are inserted as one batch.
//!
//! Shared template documents live beside the images under their own prefix
//! (see [`shared`]).

use kiln_core::domain::build::BuildResult;
use kiln_core::domain::registry::{RegistryEntry, RegistryKey};
use kiln_core::domain::version;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_TEMPLATE_PREFIX, RegistryConfig};
use crate::error::{RegistryError, Result};
use crate::repository::{Parameter, ParameterStore};

mod shared;

pub use shared::DEFAULT_SHARED_VERSION;

pub struct Registry {
    store: Arc<dyn ParameterStore>,
    prefix: String,
    template_prefix: String,
    actor: String,
}

impl Registry {
    pub fn new(
        store: Arc<dyn ParameterStore>,
        prefix: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        let prefix: String = prefix.into();
        Self {
            store,
            prefix: prefix.trim_end_matches('/').to_string(),
            template_prefix: DEFAULT_TEMPLATE_PREFIX.to_string(),
            actor: actor.into(),
        }
    }

    /// Stores shared template documents under `prefix` instead of the default
    pub fn with_template_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        self.template_prefix = prefix.trim_end_matches('/').to_string();
        self
    }

    pub fn from_config(store: Arc<dyn ParameterStore>, config: &RegistryConfig) -> Self {
        Self::new(store, &config.parameter_prefix, &config.actor)
            .with_template_prefix(&config.template_prefix)
    }

    /// Publishes a successful build
    ///
    /// Writes the primary-region entry and one entry per copied region under
    /// the same version, all or none of them. Returns the primary entry.
    ///
    /// # Errors
    /// - `NotPublishable` for dry runs, failed builds and builds without an image
    /// - `InvalidKey` when a key segment cannot be stored as a path segment
    /// - `DuplicateKey` when any of the keys is already published
    pub async fn publish(&self, result: &BuildResult) -> Result<RegistryEntry> {
        let image_id = publishable_image(result)?;

        let now = chrono::Utc::now();
        let primary = RegistryEntry {
            template_name: result.template_name.clone(),
            version: result.version.clone(),
            image_id: image_id.to_string(),
            region: result.region.clone(),
            architecture: result.architecture.clone(),
            build_id: result.build_id.clone(),
            built_at: result.completed_at.unwrap_or(result.started_at),
            published_at: now,
            published_by: self.actor.clone(),
            description: result.description.clone(),
            copied_from: None,
        };
        let copies: Vec<RegistryEntry> = result
            .copied_images
            .iter()
            .filter(|(region, _)| **region != result.region)
            .map(|(region, copied_id)| RegistryEntry {
                image_id: copied_id.clone(),
                region: region.clone(),
                copied_from: Some(result.region.clone()),
                ..primary.clone()
            })
            .collect();

        let mut batch = Vec::with_capacity(copies.len() + 1);
        for entry in std::iter::once(&primary).chain(copies.iter()) {
            let key = entry.key();
            if let Some((field, value)) = key.invalid_segment() {
                return Err(RegistryError::InvalidKey {
                    field,
                    value: value.to_string(),
                });
            }
            batch.push((
                key.clone(),
                Parameter {
                    name: key.parameter_name(&self.prefix),
                    value: serde_json::to_string(entry)?,
                },
            ));
        }

        // All regions are written together or not at all
        let parameters: Vec<Parameter> = batch.iter().map(|(_, p)| p.clone()).collect();
        if let Some(taken) = self.store.put_all_if_absent(&parameters).await? {
            let key = batch
                .into_iter()
                .find(|(_, p)| p.name == taken)
                .map(|(key, _)| key)
                .unwrap_or_else(|| primary.key());
            return Err(RegistryError::DuplicateKey { key });
        }

        info!(
            "Published {} as {} by {}",
            primary.key(),
            primary.image_id,
            primary.published_by
        );
        for entry in &copies {
            debug!("Published regional copy {} as {}", entry.key(), entry.image_id);
        }

        Ok(primary)
    }

    /// Every version published for `template`, deduplicated and sorted
    pub async fn list_versions(&self, template: &str) -> Result<Vec<String>> {
        let versions: BTreeSet<String> = self
            .keys_for(template)
            .await?
            .into_iter()
            .map(|key| key.version)
            .collect();

        Ok(version::list_sorted(&versions.into_iter().collect::<Vec<_>>()))
    }

    /// The entry for `template` at `version`
    ///
    /// When several regions hold the version, the primary (first published)
    /// entry is returned.
    pub async fn get_entry(&self, template: &str, version: &str) -> Result<RegistryEntry> {
        self.entries(template)
            .await?
            .into_iter()
            .filter(|entry| entry.version == version)
            .min_by_key(|entry| (entry.copied_from.is_some(), entry.published_at))
            .ok_or_else(|| RegistryError::not_found(template, version))
    }

    /// Exact fetch by key
    pub async fn lookup(&self, key: &RegistryKey) -> Result<RegistryEntry> {
        let name = key.parameter_name(&self.prefix);
        match self.store.get(&name).await? {
            Some(value) => decode(&name, &value),
            None => Err(RegistryError::not_found(&key.template, &key.version)),
        }
    }

    /// Greatest published version for a region and architecture
    ///
    /// Versions that are not semantic versions (build ids) only win when
    /// nothing else is published; then the most recently published entry is
    /// returned.
    pub async fn latest(
        &self,
        template: &str,
        region: &str,
        architecture: &str,
    ) -> Result<Option<RegistryEntry>> {
        let candidates: Vec<RegistryEntry> = self
            .entries(template)
            .await?
            .into_iter()
            .filter(|e| e.region == region && e.architecture == architecture)
            .collect();

        let versions: Vec<&str> = candidates.iter().map(|e| e.version.as_str()).collect();
        if let Some(best) = version::latest(&versions) {
            return Ok(candidates.into_iter().find(|e| e.version == best));
        }

        Ok(candidates.into_iter().max_by_key(|e| e.published_at))
    }

    /// Every template with at least one published entry, sorted by name
    pub async fn list_templates(&self) -> Result<Vec<String>> {
        let root = format!("{}/", self.prefix);
        let templates: BTreeSet<String> = self
            .store
            .list_by_path(&root)
            .await?
            .into_iter()
            .filter_map(|p| RegistryKey::from_parameter_name(&self.prefix, &p.name))
            .map(|key| key.template)
            .collect();

        Ok(templates.into_iter().collect())
    }

    /// Every entry published for `template`, ordered by key
    pub async fn entries(&self, template: &str) -> Result<Vec<RegistryEntry>> {
        let path = format!("{}/{}/", self.prefix, template);
        let mut entries = Vec::new();

        for parameter in self.store.list_by_path(&path).await? {
            match RegistryKey::from_parameter_name(&self.prefix, &parameter.name) {
                Some(key) if key.template == template => {
                    entries.push(decode(&parameter.name, &parameter.value)?);
                }
                _ => warn!("Ignoring unexpected parameter {}", parameter.name),
            }
        }

        Ok(entries)
    }

    async fn keys_for(&self, template: &str) -> Result<Vec<RegistryKey>> {
        let path = format!("{}/{}/", self.prefix, template);
        Ok(self
            .store
            .list_by_path(&path)
            .await?
            .into_iter()
            .filter_map(|p| RegistryKey::from_parameter_name(&self.prefix, &p.name))
            .filter(|key| key.template == template)
            .collect())
    }
}

fn publishable_image(result: &BuildResult) -> Result<&str> {
    let not_publishable = |reason: String| RegistryError::NotPublishable { reason };

    if result.dry_run {
        return Err(not_publishable(format!(
            "build {} was a dry run",
            result.build_id
        )));
    }
    if !result.is_success() {
        return Err(not_publishable(format!(
            "build {} did not succeed",
            result.build_id
        )));
    }
    result
        .image_id
        .as_deref()
        .ok_or_else(|| not_publishable(format!("build {} produced no image", result.build_id)))
}

fn decode(name: &str, value: &str) -> Result<RegistryEntry> {
    serde_json::from_str(value).map_err(|source| RegistryError::Corrupt {
        name: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryParameterStore;
    use kiln_core::domain::build::BuildStatus;

    const PREFIX: &str = "/kiln/images";

    fn registry() -> (Arc<InMemoryParameterStore>, Registry) {
        let store = Arc::new(InMemoryParameterStore::new());
        let registry = Registry::new(store.clone(), PREFIX, "ci-bot");
        (store, registry)
    }

    fn built(template: &str, version: &str, image: &str) -> BuildResult {
        let mut result = BuildResult::pending(
            format!("{}-0000abcd", template),
            template,
            version,
            "us-east-1",
            "x86_64",
        );
        result.status = BuildStatus::Success;
        result.image_id = Some(image.to_string());
        result.description = "test image".to_string();
        result
    }

    #[tokio::test]
    async fn test_publish_and_get() {
        let (_, registry) = registry();
        let entry = registry
            .publish(&built("python-ml", "1.0.0", "img-1"))
            .await
            .unwrap();

        assert_eq!(entry.published_by, "ci-bot");
        assert_eq!(entry.image_id, "img-1");
        assert!(entry.copied_from.is_none());

        let fetched = registry.get_entry("python-ml", "1.0.0").await.unwrap();
        assert_eq!(fetched, entry);
        assert_eq!(registry.lookup(&entry.key()).await.unwrap(), entry);
    }

    #[tokio::test]
    async fn test_duplicate_publish_keeps_first_entry() {
        let (store, registry) = registry();
        registry
            .publish(&built("python-ml", "1.0.0", "img-first"))
            .await
            .unwrap();

        let err = registry
            .publish(&built("python-ml", "1.0.0", "img-second"))
            .await
            .unwrap_err();
        match err {
            RegistryError::DuplicateKey { key } => {
                assert_eq!(key, RegistryKey::new("python-ml", "us-east-1", "x86_64", "1.0.0"));
            }
            other => panic!("expected duplicate key, got {:?}", other),
        }

        assert_eq!(store.len(), 1);
        let entry = registry.get_entry("python-ml", "1.0.0").await.unwrap();
        assert_eq!(entry.image_id, "img-first");
    }

    #[tokio::test]
    async fn test_concurrent_publishes_of_one_key_have_one_winner() {
        let (store, registry) = registry();
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .publish(&built("r-base", "2.0.0", &format!("img-{}", i)))
                        .await
                })
            })
            .collect();

        let mut published = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => published += 1,
                Err(e) if e.is_duplicate() => duplicates += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(published, 1);
        assert_eq!(duplicates, 7);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_records_copied_regions() {
        let (_, registry) = registry();
        let mut result = built("python-ml", "1.1.0", "img-1");
        result
            .copied_images
            .insert("eu-west-1".to_string(), "img-eu".to_string());

        let primary = registry.publish(&result).await.unwrap();
        assert_eq!(primary.region, "us-east-1");

        let entries = registry.entries("python-ml").await.unwrap();
        assert_eq!(entries.len(), 2);
        let copy = entries.iter().find(|e| e.region == "eu-west-1").unwrap();
        assert_eq!(copy.image_id, "img-eu");
        assert_eq!(copy.copied_from.as_deref(), Some("us-east-1"));

        // Both regions hold 1.1.0; the primary is returned
        let entry = registry.get_entry("python-ml", "1.1.0").await.unwrap();
        assert_eq!(entry.region, "us-east-1");
        assert_eq!(registry.list_versions("python-ml").await.unwrap(), vec!["1.1.0"]);
    }

    #[tokio::test]
    async fn test_regional_conflict_publishes_nothing() {
        let (store, registry) = registry();
        let mut eu = built("python-ml", "1.0.0", "img-eu-direct");
        eu.region = "eu-west-1".to_string();
        registry.publish(&eu).await.unwrap();

        let mut result = built("python-ml", "1.0.0", "img-1");
        result
            .copied_images
            .insert("eu-west-1".to_string(), "img-eu".to_string());
        let err = registry.publish(&result).await.unwrap_err();

        assert!(err.is_duplicate());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_overlapping_publishes_never_half_publish() {
        for _ in 0..16 {
            let (store, registry) = registry();
            let registry = Arc::new(registry);

            let mut replicated = built("python-ml", "1.0.0", "img-us");
            replicated
                .copied_images
                .insert("eu-west-1".to_string(), "img-eu-copy".to_string());
            let mut direct = built("python-ml", "1.0.0", "img-eu-direct");
            direct.region = "eu-west-1".to_string();

            let first = {
                let registry = registry.clone();
                tokio::spawn(async move { registry.publish(&replicated).await })
            };
            let second = {
                let registry = registry.clone();
                tokio::spawn(async move { registry.publish(&direct).await })
            };
            let first = first.await.unwrap();
            let second = second.await.unwrap();

            assert!(first.is_ok() != second.is_ok());
            if first.is_ok() {
                assert_eq!(store.len(), 2);
            } else {
                assert_eq!(store.len(), 1);
                assert!(
                    registry
                        .lookup(&RegistryKey::new("python-ml", "us-east-1", "x86_64", "1.0.0"))
                        .await
                        .unwrap_err()
                        .is_not_found()
                );
            }
        }
    }

    #[tokio::test]
    async fn test_rejects_keys_with_path_separators() {
        let (store, registry) = registry();

        let err = registry
            .publish(&built("team/python", "1.0.0", "img-1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::InvalidKey { field: "template", ref value } if value == "team/python"
        ));

        let mut result = built("python-ml", "1.0.0", "img-1");
        result
            .copied_images
            .insert("eu/west".to_string(), "img-eu".to_string());
        let err = registry.publish(&result).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidKey { field: "region", .. }));

        assert!(store.is_empty());
        assert!(registry.list_templates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_unpublishable_results() {
        let (store, registry) = registry();

        let mut dry = built("r", "1.0.0", "img-1");
        dry.dry_run = true;
        let mut failed = built("r", "1.0.0", "img-1");
        failed.status = BuildStatus::Failed;
        let mut imageless = built("r", "1.0.0", "img-1");
        imageless.image_id = None;

        for result in [dry, failed, imageless] {
            assert!(matches!(
                registry.publish(&result).await,
                Err(RegistryError::NotPublishable { .. })
            ));
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_list_versions_sorted_across_regions() {
        let (_, registry) = registry();
        for (version, region) in [
            ("1.10.0", "us-east-1"),
            ("1.2.0", "us-east-1"),
            ("1.2.10", "eu-west-1"),
            ("1.2.0", "eu-west-1"),
        ] {
            let mut result = built("python-ml", version, "img");
            result.region = region.to_string();
            registry.publish(&result).await.unwrap();
        }

        let versions = registry.list_versions("python-ml").await.unwrap();
        assert_eq!(versions, vec!["1.2.0", "1.2.10", "1.10.0"]);

        let recent = version::filter_at_least(&versions, "1.2.5").unwrap();
        assert_eq!(recent, vec!["1.2.10", "1.10.0"]);
    }

    #[tokio::test]
    async fn test_get_entry_not_found() {
        let (_, registry) = registry();
        let err = registry.get_entry("python-ml", "9.9.9").await.unwrap_err();
        assert!(err.is_not_found());

        let key = RegistryKey::new("python-ml", "us-east-1", "x86_64", "9.9.9");
        assert!(registry.lookup(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_latest_per_region_and_architecture() {
        let (_, registry) = registry();
        for (version, arch) in [("1.0.0", "x86_64"), ("1.4.0", "x86_64"), ("2.0.0", "arm64")] {
            let mut result = built("r", version, &format!("img-{}", version));
            result.architecture = arch.to_string();
            registry.publish(&result).await.unwrap();
        }

        let latest = registry.latest("r", "us-east-1", "x86_64").await.unwrap().unwrap();
        assert_eq!(latest.version, "1.4.0");
        assert!(registry.latest("r", "eu-west-1", "x86_64").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_falls_back_to_most_recent_build_id() {
        let (_, registry) = registry();
        registry.publish(&built("r", "r-1111aaaa", "img-a")).await.unwrap();
        registry.publish(&built("r", "r-2222bbbb", "img-b")).await.unwrap();

        let latest = registry.latest("r", "us-east-1", "x86_64").await.unwrap().unwrap();
        assert_eq!(latest.image_id, "img-b");
    }

    #[tokio::test]
    async fn test_list_templates() {
        let (store, registry) = registry();
        for template in ["r-base", "python-ml", "r-base"] {
            let version = if store.is_empty() { "1.0.0" } else { "1.1.0" };
            registry
                .publish(&built(template, version, "img"))
                .await
                .unwrap();
        }
        // A template whose name is a prefix of another stays separate
        registry.publish(&built("r", "1.0.0", "img")).await.unwrap();

        assert_eq!(
            registry.list_templates().await.unwrap(),
            vec!["python-ml", "r", "r-base"]
        );
        assert_eq!(registry.list_versions("r").await.unwrap(), vec!["1.0.0"]);
    }

    #[tokio::test]
    async fn test_corrupt_value_is_reported() {
        let (store, registry) = registry();
        store
            .put_if_absent("/kiln/images/r/us-east-1/x86_64/version/1.0.0", "not json")
            .await
            .unwrap();

        assert!(matches!(
            registry.get_entry("r", "1.0.0").await,
            Err(RegistryError::Corrupt { .. })
        ));
    }
}
