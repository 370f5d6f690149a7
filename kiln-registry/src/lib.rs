//! Kiln Registry
//!
//! Durable record of published images, keyed by
//! (template, region, architecture, version).
//!
//! Architecture:
//! - Repository: the parameter-store contract with in-memory and Postgres
//!   implementations
//! - Service: publish and query operations on top of any parameter store
//! - Database: connection pool and schema bootstrap for the Postgres store

pub mod config;
pub mod db;
pub mod error;
pub mod repository;
pub mod service;

pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use repository::{InMemoryParameterStore, Parameter, ParameterStore, PgParameterStore};
pub use service::{DEFAULT_SHARED_VERSION, Registry};
