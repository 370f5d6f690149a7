//! Registry domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a published image
///
/// At most one entry exists per key; published entries are never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegistryKey {
    pub template: String,
    pub region: String,
    pub architecture: String,
    pub version: String,
}

impl RegistryKey {
    pub fn new(
        template: impl Into<String>,
        region: impl Into<String>,
        architecture: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            template: template.into(),
            region: region.into(),
            architecture: architecture.into(),
            version: version.into(),
        }
    }

    /// First segment that cannot appear in a parameter path, as (field, value)
    pub fn invalid_segment(&self) -> Option<(&'static str, &str)> {
        [
            ("template", self.template.as_str()),
            ("region", self.region.as_str()),
            ("architecture", self.architecture.as_str()),
            ("version", self.version.as_str()),
        ]
        .into_iter()
        .find(|(_, value)| !is_valid_segment(value))
    }

    /// Parameter-store path for this key under `prefix`
    ///
    /// `{prefix}/{template}/{region}/{architecture}/version/{version}`
    pub fn parameter_name(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}/{}/version/{}",
            prefix.trim_end_matches('/'),
            self.template,
            self.region,
            self.architecture,
            self.version
        )
    }

    /// Parses a parameter-store path produced by [`RegistryKey::parameter_name`]
    pub fn from_parameter_name(prefix: &str, name: &str) -> Option<Self> {
        let rest = name
            .strip_prefix(prefix.trim_end_matches('/'))?
            .strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [template, region, architecture, "version", version]
                if [template, region, architecture, version]
                    .iter()
                    .all(|p| !p.is_empty()) =>
            {
                Some(Self::new(*template, *region, *architecture, *version))
            }
            _ => None,
        }
    }
}

/// Whether `value` can be stored as one segment of a parameter path
///
/// Segments are separated by `/`, so a value containing one would be split
/// on the way back out and never found again.
pub fn is_valid_segment(value: &str) -> bool {
    !value.trim().is_empty() && !value.contains('/')
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.template, self.region, self.architecture, self.version
        )
    }
}

/// A published image record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub template_name: String,
    pub version: String,
    pub image_id: String,
    pub region: String,
    pub architecture: String,
    pub build_id: String,
    pub built_at: chrono::DateTime<chrono::Utc>,
    pub published_at: chrono::DateTime<chrono::Utc>,
    /// Publishing actor
    pub published_by: String,
    #[serde(default)]
    pub description: String,
    /// Source region when this entry records a regional copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copied_from: Option<String>,
}

impl RegistryEntry {
    pub fn key(&self) -> RegistryKey {
        RegistryKey::new(
            &self.template_name,
            &self.region,
            &self.architecture,
            &self.version,
        )
    }
}

/// A template document shared through the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedTemplate {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Encoding of `document`, e.g. `yaml`
    pub format: String,
    pub document: String,
    pub published_at: chrono::DateTime<chrono::Utc>,
    pub published_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_name_round_trip() {
        let key = RegistryKey::new("python-ml", "us-east-1", "x86_64", "1.2.0");
        let name = key.parameter_name("/kiln/images/");
        assert_eq!(name, "/kiln/images/python-ml/us-east-1/x86_64/version/1.2.0");

        let parsed = RegistryKey::from_parameter_name("/kiln/images", &name).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_from_parameter_name_rejects_foreign_paths() {
        assert!(RegistryKey::from_parameter_name("/kiln/images", "/other/a/b/c/version/1").is_none());
        assert!(
            RegistryKey::from_parameter_name("/kiln/images", "/kiln/images/a/b/c/tag/1").is_none()
        );
        assert!(RegistryKey::from_parameter_name("/kiln/images", "/kiln/images/a/b").is_none());
    }

    #[test]
    fn test_invalid_segment() {
        assert!(RegistryKey::new("python-ml", "us-east-1", "x86_64", "1.0.0")
            .invalid_segment()
            .is_none());
        assert_eq!(
            RegistryKey::new("team/python", "us-east-1", "x86_64", "1.0.0").invalid_segment(),
            Some(("template", "team/python"))
        );
        assert_eq!(
            RegistryKey::new("r", "us-east-1", " ", "1.0.0").invalid_segment(),
            Some(("architecture", " "))
        );
        assert!(is_valid_segment("r-base"));
        assert!(!is_valid_segment("a/b"));
        assert!(!is_valid_segment(""));
    }

    #[test]
    fn test_display() {
        let key = RegistryKey::new("r", "eu-west-1", "arm64", "2.0.0");
        assert_eq!(key.to_string(), "r/eu-west-1/arm64@2.0.0");
    }
}
