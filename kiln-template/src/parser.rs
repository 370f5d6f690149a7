//! Template document parser
//!
//! Documents are YAML:
//!
//! ```yaml
//! name: python-ml
//! base: ubuntu-22.04-server-lts
//! description: Python machine learning workstation
//! version: 1.2.0
//! build_steps:
//!   - name: install
//!     script: apt-get install -y python3=={{python_version}}
//!     timeout_seconds: 900
//! validation:
//!   - name: python
//!     script: python3 --version
//!     contains: "Python 3"
//! dependencies:
//!   - name: base-research
//!     version: ">=1.0.0"
//! parameters:
//!   python_version: "3.11"
//! ```
//!
//! Unknown fields are ignored. Dependency names are not checked here; the
//! resolver does that once the whole template set is known.

use kiln_core::domain::registry::is_valid_segment;
use kiln_core::domain::template::{BuildStep, Dependency, Template, ValidationTest};
use kiln_core::domain::version::{VersionConstraint, VersionInfo};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;

use crate::error::ParseError;

#[derive(Debug, Deserialize)]
struct RawTemplate {
    name: Option<String>,
    base: Option<String>,
    description: Option<String>,
    version: Option<Value>,
    architecture: Option<String>,
    build_steps: Option<Vec<RawStep>>,
    #[serde(default)]
    validation: Vec<RawValidation>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
    #[serde(default)]
    parameters: BTreeMap<String, Value>,
    #[serde(default)]
    tags: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    name: Option<String>,
    script: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawValidation {
    name: Option<String>,
    #[serde(alias = "command")]
    script: Option<String>,
    success: Option<bool>,
    contains: Option<String>,
    equals: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDependency {
    name: Option<String>,
    version: Option<Value>,
    /// Older documents split the operator from the version
    version_operator: Option<String>,
}

/// Parse and validate a template document
///
/// # Errors
/// Returns an error if:
/// - The document is not well-formed YAML
/// - `name`, `base` or `build_steps` is missing or empty
/// - `name` contains a `/`
/// - A build step or validation test lacks a name or a script body
/// - A dependency constraint, the template version or a parameter value is malformed
pub fn parse_template(document: &str) -> Result<Template, ParseError> {
    let raw: RawTemplate = serde_yaml::from_str(document)?;

    let name = required(raw.name, "name")?;
    if !is_valid_segment(&name) {
        return Err(ParseError::InvalidName(name));
    }
    let base = required(raw.base, "base")?;

    let raw_steps = raw
        .build_steps
        .ok_or(ParseError::MissingField("build_steps"))?;
    if raw_steps.is_empty() {
        return Err(ParseError::NoBuildSteps);
    }

    let build_steps = raw_steps
        .into_iter()
        .enumerate()
        .map(|(index, step)| parse_step(index, step))
        .collect::<Result<Vec<_>, _>>()?;

    let validation = raw
        .validation
        .into_iter()
        .enumerate()
        .map(|(index, test)| parse_validation(index, test))
        .collect::<Result<Vec<_>, _>>()?;

    let dependencies = raw
        .dependencies
        .into_iter()
        .enumerate()
        .map(|(index, dep)| parse_dependency(index, dep))
        .collect::<Result<Vec<_>, _>>()?;

    let version = match raw.version {
        Some(value) => {
            let version = scalar_to_string(&value).ok_or(ParseError::InvalidParameter {
                name: "version".to_string(),
                reason: "must be a scalar".to_string(),
            })?;
            VersionInfo::parse(&version).map_err(ParseError::InvalidVersion)?;
            Some(version)
        }
        None => None,
    };

    let parameters = scalar_map(raw.parameters)?;
    let tags = scalar_map(raw.tags)?;

    Ok(Template {
        name,
        base,
        description: raw.description.unwrap_or_default(),
        version,
        architecture: raw.architecture.filter(|a| !a.trim().is_empty()),
        build_steps,
        validation,
        dependencies,
        parameters,
        tags,
    })
}

/// Serialize a template back into a document accepted by [`parse_template`]
pub fn to_document(template: &Template) -> Result<String, ParseError> {
    Ok(serde_yaml::to_string(template)?)
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ParseError> {
    match value {
        None => Err(ParseError::MissingField(field)),
        Some(v) if v.trim().is_empty() => Err(ParseError::EmptyField(field)),
        Some(v) => Ok(v),
    }
}

fn parse_step(index: usize, raw: RawStep) -> Result<BuildStep, ParseError> {
    let invalid = |reason: String| ParseError::InvalidStep { index, reason };

    let name = raw
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| invalid("missing name".to_string()))?;
    let script = raw
        .script
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| invalid(format!("step '{}' has no script", name)))?;

    if raw.timeout_seconds == Some(0) {
        return Err(invalid(format!(
            "step '{}' timeout_seconds must be greater than 0",
            name
        )));
    }

    Ok(BuildStep {
        name,
        script,
        timeout_seconds: raw.timeout_seconds,
    })
}

fn parse_validation(index: usize, raw: RawValidation) -> Result<ValidationTest, ParseError> {
    let invalid = |reason: String| ParseError::InvalidValidation { index, reason };

    let name = raw
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| invalid("missing name".to_string()))?;
    let script = raw
        .script
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| invalid(format!("test '{}' has no script", name)))?;

    Ok(ValidationTest {
        name,
        script,
        success: raw.success.unwrap_or(true),
        contains: raw.contains,
        equals: raw.equals,
    })
}

fn parse_dependency(index: usize, raw: RawDependency) -> Result<Dependency, ParseError> {
    let invalid = |reason: String| ParseError::InvalidDependency { index, reason };

    let name = raw
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| invalid("missing name".to_string()))?;

    let version = match raw.version.as_ref().map(scalar_to_string) {
        Some(None) => return Err(invalid(format!("'{}' version must be a scalar", name))),
        Some(Some(v)) if v.trim().is_empty() => None,
        Some(Some(v)) => Some(v),
        None => None,
    };

    let constraint = match (raw.version_operator, version) {
        (Some(op), Some(v)) => Some(format!("{}{}", op.trim(), v.trim())),
        (Some(_), None) => {
            return Err(invalid(format!(
                "'{}' has version_operator but no version",
                name
            )));
        }
        (None, v) => v,
    };

    if let Some(constraint) = &constraint {
        VersionConstraint::parse(constraint).map_err(|e| invalid(e.to_string()))?;
    }

    Ok(Dependency {
        name,
        version: constraint,
    })
}

/// Scalars are kept as their textual form; `None` for sequences and mappings
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn scalar_map(raw: BTreeMap<String, Value>) -> Result<BTreeMap<String, String>, ParseError> {
    raw.into_iter()
        .map(|(name, value)| {
            if name.trim().is_empty() {
                return Err(ParseError::InvalidParameter {
                    name,
                    reason: "name must not be empty".to_string(),
                });
            }
            match scalar_to_string(&value) {
                Some(v) => Ok((name, v)),
                None => Err(ParseError::InvalidParameter {
                    name,
                    reason: "value must be a string, number or boolean".to_string(),
                }),
            }
        })
        .collect()
}
