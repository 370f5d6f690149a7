//! Registry configuration

/// Default root for shared template documents
pub const DEFAULT_TEMPLATE_PREFIX: &str = "/kiln/templates";

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Root of every parameter name, e.g. `/kiln/images`
    pub parameter_prefix: String,

    /// Root of shared template documents, e.g. `/kiln/templates`
    pub template_prefix: String,

    /// Identity recorded as the publisher of new entries
    pub actor: String,

    /// Postgres connection string; the in-memory store is used when absent
    pub database_url: Option<String>,
}

impl RegistryConfig {
    pub fn new(parameter_prefix: String, actor: String) -> Self {
        Self {
            parameter_prefix,
            template_prefix: DEFAULT_TEMPLATE_PREFIX.to_string(),
            actor,
            database_url: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - KILN_REGISTRY_PREFIX (default: /kiln/images)
    /// - KILN_TEMPLATE_PREFIX (default: /kiln/templates)
    /// - KILN_ACTOR, falling back to USER (default: unknown)
    /// - KILN_DATABASE_URL
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let config = Self {
            parameter_prefix: std::env::var("KILN_REGISTRY_PREFIX")
                .unwrap_or(defaults.parameter_prefix),
            template_prefix: std::env::var("KILN_TEMPLATE_PREFIX")
                .unwrap_or(defaults.template_prefix),
            actor: std::env::var("KILN_ACTOR")
                .or_else(|_| std::env::var("USER"))
                .unwrap_or(defaults.actor),
            database_url: std::env::var("KILN_DATABASE_URL").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for prefix in [&self.parameter_prefix, &self.template_prefix] {
            if !prefix.starts_with('/') {
                anyhow::bail!("Registry prefix must start with '/': '{}'", prefix);
            }

            if prefix.trim_end_matches('/').is_empty() {
                anyhow::bail!("Registry prefix cannot be the root path");
            }
        }

        // Neither tree may contain the other
        let images = format!("{}/", self.parameter_prefix.trim_end_matches('/'));
        let templates = format!("{}/", self.template_prefix.trim_end_matches('/'));
        if images.starts_with(&templates) || templates.starts_with(&images) {
            anyhow::bail!(
                "Image prefix '{}' and template prefix '{}' must not overlap",
                self.parameter_prefix,
                self.template_prefix
            );
        }

        if self.actor.trim().is_empty() {
            anyhow::bail!("Publishing actor cannot be empty");
        }

        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new("/kiln/images".to_string(), "unknown".to_string())
    }
}
