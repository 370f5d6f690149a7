//! In-memory parameter store
//!
//! Used by tests and by the CLI when no database is configured.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{Parameter, ParameterStore};

#[derive(Default)]
pub struct InMemoryParameterStore {
    parameters: Mutex<BTreeMap<String, String>>,
}

impl InMemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.parameters.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ParameterStore for InMemoryParameterStore {
    async fn put_if_absent(&self, name: &str, value: &str) -> Result<bool> {
        let mut parameters = self
            .parameters
            .lock()
            .map_err(|_| anyhow!("parameter store lock poisoned"))?;

        // Check and insert under one lock
        if parameters.contains_key(name) {
            return Ok(false);
        }
        parameters.insert(name.to_string(), value.to_string());
        Ok(true)
    }

    async fn put_all_if_absent(&self, batch: &[Parameter]) -> Result<Option<String>> {
        let mut parameters = self
            .parameters
            .lock()
            .map_err(|_| anyhow!("parameter store lock poisoned"))?;

        if let Some(taken) = batch.iter().find(|p| parameters.contains_key(&p.name)) {
            return Ok(Some(taken.name.clone()));
        }
        for parameter in batch {
            parameters.insert(parameter.name.clone(), parameter.value.clone());
        }
        Ok(None)
    }

    async fn get(&self, name: &str) -> Result<Option<String>> {
        let parameters = self
            .parameters
            .lock()
            .map_err(|_| anyhow!("parameter store lock poisoned"))?;
        Ok(parameters.get(name).cloned())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut parameters = self
            .parameters
            .lock()
            .map_err(|_| anyhow!("parameter store lock poisoned"))?;
        Ok(parameters.remove(name).is_some())
    }

    async fn list_by_path(&self, path: &str) -> Result<Vec<Parameter>> {
        let parameters = self
            .parameters
            .lock()
            .map_err(|_| anyhow!("parameter store lock poisoned"))?;

        Ok(parameters
            .range(path.to_string()..)
            .take_while(|(name, _)| name.starts_with(path))
            .map(|(name, value)| Parameter {
                name: name.clone(),
                value: value.clone(),
            })
            .collect())
    }
}
