//! Template domain types
//!
//! A template is the declarative description of one machine image: the base
//! image it starts from, the ordered steps that configure it, the checks that
//! must pass before it is captured, and the other templates that must be built
//! before it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declarative build specification for one machine image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    /// Base image reference the build starts from
    pub base: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// The template's own semantic version, checked against dependency constraints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Restricts the architectures this template may be built for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    pub build_steps: Vec<BuildStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation: Vec<ValidationTest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    /// Parameter name -> default value
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl Template {
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.name.as_str())
    }

    /// Whether the template may be built for `architecture`
    pub fn supports_architecture(&self, architecture: &str) -> bool {
        match &self.architecture {
            Some(required) => required == architecture,
            None => true,
        }
    }
}

/// A single named script run on the provisioning target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
    pub name: String,
    pub script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// A post-build check that must pass before the image is captured
///
/// Every expectation that is set must hold: `success` requires a zero exit
/// status, `contains` requires the output to include the string and `equals`
/// requires the trimmed output to match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationTest {
    pub name: String,
    pub script: String,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,
}

fn default_success() -> bool {
    true
}

impl ValidationTest {
    /// Checks a finished run against this test's expectations
    ///
    /// Returns a human-readable reason on the first expectation that fails.
    pub fn check(&self, exit_code: i32, output: &str) -> Result<(), String> {
        if self.success && exit_code != 0 {
            return Err(format!("expected exit status 0, got {}", exit_code));
        }

        if let Some(needle) = &self.contains {
            if !output.contains(needle.as_str()) {
                return Err(format!("output does not contain '{}'", needle));
            }
        }

        if let Some(expected) = &self.equals {
            if output.trim() != expected.as_str() {
                return Err(format!(
                    "output '{}' does not equal '{}'",
                    output.trim(),
                    expected
                ));
            }
        }

        Ok(())
    }
}

/// Build-ordering edge to another template
///
/// A dependency only sequences builds; none of the dependency's content is
/// injected into the dependent image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    /// Version constraint such as `>=1.2.0`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test(success: bool, contains: Option<&str>, equals: Option<&str>) -> ValidationTest {
        ValidationTest {
            name: "check".to_string(),
            script: "true".to_string(),
            success,
            contains: contains.map(str::to_string),
            equals: equals.map(str::to_string),
        }
    }

    #[test]
    fn test_check_success_flag() {
        assert!(test(true, None, None).check(0, "").is_ok());
        assert!(test(true, None, None).check(2, "").is_err());
        // Without the success expectation a non-zero exit is allowed
        assert!(test(false, None, None).check(2, "").is_ok());
    }

    #[test]
    fn test_check_contains_and_success() {
        let t = test(true, Some("Python 3"), None);
        assert!(t.check(0, "Python 3.11.4\n").is_ok());
        assert!(t.check(0, "Python 2.7").is_err());
        assert!(t.check(1, "Python 3.11.4").is_err());
    }

    #[test]
    fn test_check_equals_trims_output() {
        let t = test(true, None, Some("ok"));
        assert!(t.check(0, "ok\n").is_ok());
        assert!(t.check(0, "not ok").is_err());
    }

    #[test]
    fn test_supports_architecture() {
        let mut template = Template {
            name: "base".to_string(),
            base: "ubuntu:22.04".to_string(),
            description: String::new(),
            version: None,
            architecture: None,
            build_steps: vec![],
            validation: vec![],
            dependencies: vec![],
            parameters: BTreeMap::new(),
            tags: BTreeMap::new(),
        };
        assert!(template.supports_architecture("arm64"));

        template.architecture = Some("x86_64".to_string());
        assert!(template.supports_architecture("x86_64"));
        assert!(!template.supports_architecture("arm64"));
    }
}
