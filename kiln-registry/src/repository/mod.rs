//! Repository Module
//!
//! Storage behind the registry: a hierarchical key-value parameter store.
//! Names are `/`-separated paths; values are opaque strings.

use anyhow::Result;
use async_trait::async_trait;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryParameterStore;
pub use postgres::PgParameterStore;

/// One stored parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

/// Key-value parameter store
///
/// Writes are insert-only: an existing name is never overwritten, and the
/// store itself guarantees that concurrent inserts of the same name have
/// exactly one winner.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Inserts `name` unless it exists; returns whether this call inserted it
    async fn put_if_absent(&self, name: &str, value: &str) -> Result<bool>;

    /// Inserts every parameter or none of them
    ///
    /// Returns the first name that already exists, in which case nothing
    /// was written.
    async fn put_all_if_absent(&self, parameters: &[Parameter]) -> Result<Option<String>>;

    async fn get(&self, name: &str) -> Result<Option<String>>;

    /// Removes `name`; returns whether it existed
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Every parameter whose name starts with `path`, ordered by name
    async fn list_by_path(&self, path: &str) -> Result<Vec<Parameter>>;
}
