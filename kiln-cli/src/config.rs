//! Configuration module
//!
//! Combines command-line flags with the builder and registry settings read
//! from the environment.

use anyhow::{Context, Result};
use kiln_builder::BuilderConfig;
use kiln_registry::{
    InMemoryParameterStore, ParameterStore, PgParameterStore, Registry, RegistryConfig, db,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding template documents
    pub templates_dir: PathBuf,

    pub builder: BuilderConfig,

    pub registry: RegistryConfig,
}

impl Config {
    /// Loads environment settings; a `database_url` flag overrides the environment
    pub fn load(templates_dir: PathBuf, database_url: Option<String>) -> Result<Self> {
        let builder = BuilderConfig::from_env().context("Invalid builder configuration")?;

        let mut registry = RegistryConfig::from_env().context("Invalid registry configuration")?;
        if database_url.is_some() {
            registry.database_url = database_url;
        }

        Ok(Self {
            templates_dir,
            builder,
            registry,
        })
    }

    /// Opens the registry named by the configuration
    ///
    /// Without a database URL the registry lives in memory and is discarded
    /// when the command exits.
    pub async fn open_registry(&self) -> Result<Registry> {
        let store: Arc<dyn ParameterStore> = match &self.registry.database_url {
            Some(url) => {
                info!("Connecting to registry database...");
                let pool = db::create_pool(url)
                    .await
                    .context("Failed to connect to registry database")?;
                db::run_migrations(&pool)
                    .await
                    .context("Failed to prepare registry schema")?;
                Arc::new(PgParameterStore::new(pool))
            }
            None => {
                warn!("KILN_DATABASE_URL is not set; using a temporary in-memory registry");
                Arc::new(InMemoryParameterStore::new())
            }
        };

        Ok(Registry::from_config(store, &self.registry))
    }
}
