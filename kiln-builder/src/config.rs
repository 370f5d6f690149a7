//! Builder configuration
//!
//! Defines the defaults and bounded waits used by every build: how long a
//! step, a validation test, provisioning, image capture and region copies may
//! take before the build is failed with a timeout.

use std::time::Duration;

/// Builder configuration
///
/// Every remote operation is bounded by one of these timeouts.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Identifier recorded on every build result
    pub builder_id: String,

    /// Region used when a request does not name one
    pub default_region: String,

    /// Architecture used when a request does not name one
    pub default_architecture: String,

    /// Applies to build steps without their own timeout
    pub default_step_timeout: Duration,

    /// Per validation test
    pub validation_timeout: Duration,

    /// Allocation and readiness wait, each
    pub provision_timeout: Duration,

    /// Image capture, instance stop and instance start, each
    pub capture_timeout: Duration,

    /// Per region copy
    pub copy_timeout: Duration,
}

impl BuilderConfig {
    /// Creates a new configuration with defaults
    pub fn new(builder_id: String) -> Self {
        Self {
            builder_id,
            default_region: "us-east-1".to_string(),
            default_architecture: "x86_64".to_string(),
            default_step_timeout: Duration::from_secs(600),
            validation_timeout: Duration::from_secs(60),
            provision_timeout: Duration::from_secs(300),
            capture_timeout: Duration::from_secs(1800),
            copy_timeout: Duration::from_secs(1800),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - KILN_BUILDER_ID (default: random)
    /// - KILN_REGION, falling back to AWS_REGION (default: us-east-1)
    /// - KILN_ARCH (default: x86_64)
    /// - KILN_STEP_TIMEOUT (seconds, default: 600)
    /// - KILN_VALIDATION_TIMEOUT (seconds, default: 60)
    /// - KILN_PROVISION_TIMEOUT (seconds, default: 300)
    /// - KILN_CAPTURE_TIMEOUT (seconds, default: 1800)
    /// - KILN_COPY_TIMEOUT (seconds, default: 1800)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let builder_id = std::env::var("KILN_BUILDER_ID").unwrap_or(defaults.builder_id);

        let default_region = std::env::var("KILN_REGION")
            .or_else(|_| std::env::var("AWS_REGION"))
            .unwrap_or(defaults.default_region);

        let default_architecture =
            std::env::var("KILN_ARCH").unwrap_or(defaults.default_architecture);

        let config = Self {
            builder_id,
            default_region,
            default_architecture,
            default_step_timeout: env_secs("KILN_STEP_TIMEOUT")?
                .unwrap_or(defaults.default_step_timeout),
            validation_timeout: env_secs("KILN_VALIDATION_TIMEOUT")?
                .unwrap_or(defaults.validation_timeout),
            provision_timeout: env_secs("KILN_PROVISION_TIMEOUT")?
                .unwrap_or(defaults.provision_timeout),
            capture_timeout: env_secs("KILN_CAPTURE_TIMEOUT")?
                .unwrap_or(defaults.capture_timeout),
            copy_timeout: env_secs("KILN_COPY_TIMEOUT")?.unwrap_or(defaults.copy_timeout),
        };

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.builder_id.is_empty() {
            anyhow::bail!("builder_id cannot be empty");
        }

        if self.default_region.is_empty() {
            anyhow::bail!("default_region cannot be empty");
        }

        if self.default_architecture.is_empty() {
            anyhow::bail!("default_architecture cannot be empty");
        }

        let timeouts = [
            ("default_step_timeout", self.default_step_timeout),
            ("validation_timeout", self.validation_timeout),
            ("provision_timeout", self.provision_timeout),
            ("capture_timeout", self.capture_timeout),
            ("copy_timeout", self.copy_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        Ok(())
    }
}

/// Reads a whole number of seconds; unset is `None`, unparseable is an error
fn env_secs(name: &str) -> anyhow::Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => {
            let secs = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| anyhow::anyhow!("{} must be a number of seconds, got '{}'", name, raw))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self::new(format!("kiln-{}", &id[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BuilderConfig::default();
        assert_eq!(config.default_region, "us-east-1");
        assert_eq!(config.default_architecture, "x86_64");
        assert_eq!(config.default_step_timeout, Duration::from_secs(600));
        assert_eq!(config.validation_timeout, Duration::from_secs(60));
        assert!(config.builder_id.starts_with("kiln-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BuilderConfig::default();

        config.builder_id = String::new();
        assert!(config.validate().is_err());
        config.builder_id = "builder-1".to_string();

        config.default_region = String::new();
        assert!(config.validate().is_err());
        config.default_region = "eu-west-1".to_string();

        config.copy_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config.copy_timeout = Duration::from_secs(5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_secs_unset() {
        assert_eq!(env_secs("KILN_TEST_SURELY_UNSET_VARIABLE").unwrap(), None);
    }
}
