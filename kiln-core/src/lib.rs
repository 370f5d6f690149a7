//! Kiln Core
//!
//! Core types and abstractions for the Kiln image build system.
//!
//! This crate contains:
//! - Domain types: templates, versions, build requests/results, registry entries
//! - DTOs: request and report shapes passed between the builder, registry and CLI

pub mod domain;
pub mod dto;
