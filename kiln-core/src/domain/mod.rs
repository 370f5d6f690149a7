//! Core domain types
//!
//! These types are shared between the template tooling (parsing and
//! resolution), the builder (execution) and the registry (persistence).

pub mod build;
pub mod log;
pub mod registry;
pub mod template;
pub mod version;
