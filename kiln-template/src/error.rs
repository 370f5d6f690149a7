//! Error types for template parsing, rendering and resolution

use kiln_core::domain::version::VersionError;
use std::path::PathBuf;
use thiserror::Error;

/// A template document could not be turned into a valid template
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not well-formed
    #[error("malformed template document: {0}")]
    Syntax(#[from] serde_yaml::Error),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("template name '{0}' must not contain '/'")]
    InvalidName(String),

    #[error("template must have at least one build step")]
    NoBuildSteps,

    #[error("build step {index}: {reason}")]
    InvalidStep { index: usize, reason: String },

    #[error("validation test {index}: {reason}")]
    InvalidValidation { index: usize, reason: String },

    #[error("dependency {index}: {reason}")]
    InvalidDependency { index: usize, reason: String },

    #[error("parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("invalid template version: {0}")]
    InvalidVersion(#[source] VersionError),
}

/// Parameter values could not be applied to a template
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("parameter '{name}' is not declared by template '{template}'")]
    UndeclaredParameter { template: String, name: String },
}

/// Loading a directory of templates failed
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("template '{0}' is defined more than once")]
    Duplicate(String),
}

/// A build order could not be computed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("template '{0}' not found")]
    UnknownTemplate(String),

    #[error("template '{referrer}' depends on unknown template '{missing}'")]
    MissingDependency { missing: String, referrer: String },

    #[error("dependency cycle detected: {}", describe_cycle(.members))]
    Cycle { members: Vec<String> },

    #[error(
        "template '{referrer}' requires '{dependency}' {constraint}, but found version {found}"
    )]
    VersionMismatch {
        dependency: String,
        referrer: String,
        constraint: String,
        found: String,
    },

    #[error("template '{referrer}' has an invalid constraint on '{dependency}': {source}")]
    InvalidConstraint {
        dependency: String,
        referrer: String,
        #[source]
        source: VersionError,
    },

    #[error("template '{template}' declares an invalid version: {source}")]
    InvalidVersion {
        template: String,
        #[source]
        source: VersionError,
    },
}

fn describe_cycle(members: &[String]) -> String {
    let mut path = members.join(" -> ");
    if let Some(first) = members.first() {
        path.push_str(" -> ");
        path.push_str(first);
    }
    path
}
