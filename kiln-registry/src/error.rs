//! Error types for the registry

use kiln_core::domain::registry::RegistryKey;
use thiserror::Error;

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The key was already published; the existing entry is untouched
    #[error("an image is already published for {key}")]
    DuplicateKey { key: RegistryKey },

    #[error("no published image for {template} version {version}")]
    NotFound { template: String, version: String },

    /// A key segment would not survive the round trip through a parameter path
    #[error("invalid {field} '{value}': must be non-empty and contain no '/'")]
    InvalidKey { field: &'static str, value: String },

    #[error("template {name} version {version} is already shared")]
    AlreadyShared { name: String, version: String },

    #[error("no shared template {name}{}", describe_version(.version))]
    NotShared {
        name: String,
        version: Option<String>,
    },

    #[error("build result cannot be published: {reason}")]
    NotPublishable { reason: String },

    /// A stored value is not a valid entry
    #[error("corrupt registry entry at {name}: {source}")]
    Corrupt {
        name: String,
        source: serde_json::Error,
    },

    #[error("failed to serialize registry entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("registry storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl RegistryError {
    pub fn not_found(template: impl Into<String>, version: impl Into<String>) -> Self {
        Self::NotFound {
            template: template.into(),
            version: version.into(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. } | Self::AlreadyShared { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NotShared { .. })
    }
}

fn describe_version(version: &Option<String>) -> String {
    match version {
        Some(v) => format!(" version {}", v),
        None => String::new(),
    }
}
