//! Shared template documents
//!
//! Documents are stored as JSON values under `{template_prefix}/{name}/{version}`.
//! A shared version is immutable like a published image: sharing a changed
//! document needs a new version.

use kiln_core::domain::registry::{SharedTemplate, is_valid_segment};
use kiln_core::domain::template::Template;
use kiln_core::domain::version;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::Registry;
use crate::error::{RegistryError, Result};

/// Version recorded when neither the caller nor the template names one
pub const DEFAULT_SHARED_VERSION: &str = "1.0.0";

const DOCUMENT_FORMAT: &str = "yaml";

impl Registry {
    /// Shares `document`, the serialized form of `template`
    ///
    /// The version is `version`, else the template's own version, else
    /// [`DEFAULT_SHARED_VERSION`].
    pub async fn share_template(
        &self,
        template: &Template,
        document: &str,
        version: Option<&str>,
    ) -> Result<SharedTemplate> {
        let version = version
            .or(template.version.as_deref())
            .unwrap_or(DEFAULT_SHARED_VERSION);

        for (field, value) in [("template", template.name.as_str()), ("version", version)] {
            if !is_valid_segment(value) {
                return Err(RegistryError::InvalidKey {
                    field,
                    value: value.to_string(),
                });
            }
        }

        let shared = SharedTemplate {
            name: template.name.clone(),
            version: version.to_string(),
            description: template.description.clone(),
            architecture: template.architecture.clone(),
            tags: template.tags.clone(),
            format: DOCUMENT_FORMAT.to_string(),
            document: document.to_string(),
            published_at: chrono::Utc::now(),
            published_by: self.actor.clone(),
        };

        let name = self.shared_name(&shared.name, &shared.version);
        if !self
            .store
            .put_if_absent(&name, &serde_json::to_string(&shared)?)
            .await?
        {
            return Err(RegistryError::AlreadyShared {
                name: shared.name,
                version: shared.version,
            });
        }

        info!(
            "Shared template {} version {} by {}",
            shared.name, shared.version, shared.published_by
        );
        Ok(shared)
    }

    /// The latest shared version of every template, sorted by name
    pub async fn list_shared_templates(&self) -> Result<Vec<SharedTemplate>> {
        let mut by_name: BTreeMap<String, Vec<SharedTemplate>> = BTreeMap::new();
        for shared in self.shared_under(&format!("{}/", self.template_prefix)).await? {
            by_name.entry(shared.name.clone()).or_default().push(shared);
        }

        Ok(by_name.into_values().filter_map(newest).collect())
    }

    /// Every shared version of `name`, sorted
    pub async fn list_shared_versions(&self, name: &str) -> Result<Vec<String>> {
        let versions: Vec<String> = self
            .shared_versions(name)
            .await?
            .into_iter()
            .map(|shared| shared.version)
            .collect();

        Ok(version::list_sorted(&versions))
    }

    /// A shared template at `version`, or its latest version when `None`
    pub async fn get_shared_template(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<SharedTemplate> {
        let not_shared = || RegistryError::NotShared {
            name: name.to_string(),
            version: version.map(str::to_string),
        };

        match version {
            Some(version) => {
                let key = self.shared_name(name, version);
                match self.store.get(&key).await? {
                    Some(value) => decode(&key, &value),
                    None => Err(not_shared()),
                }
            }
            None => newest(self.shared_versions(name).await?).ok_or_else(not_shared),
        }
    }

    /// Removes one shared version, or every version when `version` is `None`
    ///
    /// Returns how many versions were removed.
    pub async fn unshare_template(&self, name: &str, version: Option<&str>) -> Result<usize> {
        let names: Vec<String> = match version {
            Some(version) => vec![self.shared_name(name, version)],
            None => self
                .store
                .list_by_path(&format!("{}/{}/", self.template_prefix, name))
                .await?
                .into_iter()
                .map(|p| p.name)
                .collect(),
        };

        let mut removed = 0;
        for parameter in names {
            if self.store.delete(&parameter).await? {
                removed += 1;
            }
        }

        if removed == 0 {
            return Err(RegistryError::NotShared {
                name: name.to_string(),
                version: version.map(str::to_string),
            });
        }
        info!("Removed {} shared version(s) of {}", removed, name);
        Ok(removed)
    }

    fn shared_name(&self, name: &str, version: &str) -> String {
        format!("{}/{}/{}", self.template_prefix, name, version)
    }

    async fn shared_versions(&self, name: &str) -> Result<Vec<SharedTemplate>> {
        Ok(self
            .shared_under(&format!("{}/{}/", self.template_prefix, name))
            .await?
            .into_iter()
            .filter(|shared| shared.name == name)
            .collect())
    }

    async fn shared_under(&self, path: &str) -> Result<Vec<SharedTemplate>> {
        let root = format!("{}/", self.template_prefix);
        let mut shared = Vec::new();

        for parameter in self.store.list_by_path(path).await? {
            let segments: Vec<&str> = parameter
                .name
                .strip_prefix(&root)
                .map(|rest| rest.split('/').collect())
                .unwrap_or_default();
            if segments.len() != 2 {
                warn!("Ignoring unexpected parameter {}", parameter.name);
                continue;
            }
            shared.push(decode(&parameter.name, &parameter.value)?);
        }

        Ok(shared)
    }
}

/// Greatest semantic version; the most recently shared one when none parse
fn newest(candidates: Vec<SharedTemplate>) -> Option<SharedTemplate> {
    let versions: Vec<&str> = candidates.iter().map(|s| s.version.as_str()).collect();
    if let Some(best) = version::latest(&versions) {
        return candidates.into_iter().find(|s| s.version == best);
    }
    candidates.into_iter().max_by_key(|s| s.published_at)
}

fn decode(name: &str, value: &str) -> Result<SharedTemplate> {
    serde_json::from_str(value).map_err(|source| RegistryError::Corrupt {
        name: name.to_string(),
        source,
    })
}
