//! Data Transfer Objects
//!
//! Lightweight request/report shapes that cross crate boundaries
//! (CLI to builder, builder to registry).

pub mod capture;
pub mod replication;
