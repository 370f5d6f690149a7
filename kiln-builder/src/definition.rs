//! Saved-image definition
//!
//! After a running instance is captured, a definition document records where
//! the resulting images live so the capture can be referenced like any other
//! image. The document is built as a typed value and serialized in one step.

use anyhow::{Context, Result};
use kiln_core::domain::build::BuildResult;
use kiln_core::dto::capture::CaptureRequest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marks definitions that came from a live instance rather than a template build
pub const SAVED_INSTANCE_BASE: &str = "saved-instance";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedImageDefinition {
    pub name: String,
    pub description: String,
    pub base: String,
    pub source: String,
    pub original_instance: String,
    /// Image the instance was originally launched from
    pub source_image: String,
    pub saved_date: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub image_config: ImageConfig,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Region -> architecture -> image id
    pub images: BTreeMap<String, BTreeMap<String, String>>,
}

impl SavedImageDefinition {
    /// Builds the definition for a successful capture
    pub fn from_capture(request: &CaptureRequest, result: &BuildResult) -> Result<Self> {
        let image_id = result
            .image_id
            .clone()
            .context("Capture produced no image; nothing to define")?;

        let mut images: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        images
            .entry(result.region.clone())
            .or_default()
            .insert(result.architecture.clone(), image_id);
        for (region, copied) in &result.copied_images {
            images
                .entry(region.clone())
                .or_default()
                .insert(result.architecture.clone(), copied.clone());
        }

        let mut tags = BTreeMap::from([
            ("Name".to_string(), request.template_name.clone()),
            ("Type".to_string(), "saved-instance".to_string()),
            ("Source".to_string(), "kiln-capture".to_string()),
        ]);
        tags.extend(request.tags.clone());

        Ok(Self {
            name: request.template_name.clone(),
            description: request.description.clone(),
            base: SAVED_INSTANCE_BASE.to_string(),
            source: "saved-from-instance".to_string(),
            original_instance: request.instance_id.clone(),
            source_image: result.source_image.clone(),
            saved_date: result.completed_at.unwrap_or(result.started_at),
            version: result.version.clone(),
            image_config: ImageConfig { images },
            tags,
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize saved-image definition")
    }
}

/// Renders the definition document for a successful capture
pub fn render_definition(request: &CaptureRequest, result: &BuildResult) -> Result<String> {
    SavedImageDefinition::from_capture(request, result)?.to_yaml()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::domain::build::BuildStatus;

    fn captured() -> (CaptureRequest, BuildResult) {
        let mut request = CaptureRequest::new("i-0abc", "my-workstation", "us-east-1");
        request.description = "Tuned \"R\" setup: with quotes".to_string();
        request.tags.insert("Team".to_string(), "genomics".to_string());

        let mut result =
            BuildResult::pending("my-workstation-1a2b3c4d", "my-workstation", "1.0.0", "us-east-1", "x86_64");
        result.status = BuildStatus::Success;
        result.image_id = Some("img-primary".to_string());
        result.source_image = "ubuntu-22.04".to_string();
        result
            .copied_images
            .insert("eu-west-1".to_string(), "img-eu".to_string());
        (request, result)
    }

    #[test]
    fn test_definition_maps_every_region() {
        let (request, result) = captured();
        let definition = SavedImageDefinition::from_capture(&request, &result).unwrap();

        assert_eq!(definition.base, SAVED_INSTANCE_BASE);
        assert_eq!(definition.image_config.images["us-east-1"]["x86_64"], "img-primary");
        assert_eq!(definition.image_config.images["eu-west-1"]["x86_64"], "img-eu");
        assert_eq!(definition.tags["Team"], "genomics");
        assert_eq!(definition.tags["Name"], "my-workstation");
    }

    #[test]
    fn test_rendered_document_parses_back() {
        let (request, result) = captured();
        let yaml = render_definition(&request, &result).unwrap();

        // Quotes and colons in free text must not corrupt the document
        let parsed: SavedImageDefinition = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.description, "Tuned \"R\" setup: with quotes");
        assert_eq!(parsed, SavedImageDefinition::from_capture(&request, &result).unwrap());
    }

    #[test]
    fn test_requires_image() {
        let (request, mut result) = captured();
        result.image_id = None;
        assert!(render_definition(&request, &result).is_err());
    }
}
