//! Capture DTOs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request to turn a running instance into a new baseline image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub instance_id: String,
    /// Name of the template the captured image is recorded under
    pub template_name: String,
    pub description: String,
    /// Region the instance lives in
    pub region: String,
    pub copy_to_regions: Vec<String>,
    pub tags: BTreeMap<String, String>,
    /// Explicit version tag; the build id is used when absent
    pub version: Option<String>,
}

impl CaptureRequest {
    pub fn new(
        instance_id: impl Into<String>,
        template_name: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            template_name: template_name.into(),
            description: String::new(),
            region: region.into(),
            copy_to_regions: Vec::new(),
            tags: BTreeMap::new(),
            version: None,
        }
    }
}
