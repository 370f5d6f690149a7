//! Semantic version parsing and ordering
//!
//! Versions are `major.minor.patch` with an optional `-label` pre-release
//! suffix. Components are compared numerically, so `1.10.0` sorts after
//! `1.2.10`. Component strings must be canonical integers: `1.2.00` and
//! `01.2.0` are rejected rather than normalized.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing versions and version constraints
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("version string is empty")]
    Empty,

    #[error("version '{input}' must have exactly three components, found {found}")]
    ComponentCount { input: String, found: usize },

    #[error("version '{input}' has invalid component '{component}'")]
    InvalidComponent { input: String, component: String },

    #[error("version '{input}' has invalid pre-release label '{label}'")]
    InvalidPreRelease { input: String, label: String },

    #[error("invalid version constraint '{input}': {reason}")]
    InvalidConstraint { input: String, reason: String },
}

/// A parsed semantic version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionInfo {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre_release: Option<String>,
}

/// Version component selector for [`VersionInfo::bump`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Major,
    Minor,
    Patch,
}

impl VersionInfo {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
        }
    }

    /// Parses a version string
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        if input.is_empty() {
            return Err(VersionError::Empty);
        }

        let (core, pre_release) = match input.split_once('-') {
            Some((core, label)) => {
                let valid = !label.is_empty()
                    && label
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
                if !valid {
                    return Err(VersionError::InvalidPreRelease {
                        input: input.to_string(),
                        label: label.to_string(),
                    });
                }
                (core, Some(label.to_string()))
            }
            None => (input, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionError::ComponentCount {
                input: input.to_string(),
                found: parts.len(),
            });
        }

        let major = parse_component(input, parts[0])?;
        let minor = parse_component(input, parts[1])?;
        let patch = parse_component(input, parts[2])?;

        Ok(Self {
            major,
            minor,
            patch,
            pre_release,
        })
    }

    /// Returns the next version for the given component, dropping any pre-release label
    pub fn bump(&self, component: Component) -> Self {
        match component {
            Component::Major => Self::new(self.major + 1, 0, 0),
            Component::Minor => Self::new(self.major, self.minor + 1, 0),
            Component::Patch => Self::new(self.major, self.minor, self.patch + 1),
        }
    }
}

fn parse_component(input: &str, component: &str) -> Result<u64, VersionError> {
    let invalid = || VersionError::InvalidComponent {
        input: input.to_string(),
        component: component.to_string(),
    };

    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    // Leading zeros would let two spellings name the same version
    if component.len() > 1 && component.starts_with('0') {
        return Err(invalid());
    }

    component.parse::<u64>().map_err(|_| invalid())
}

impl Ord for VersionInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre_release, &other.pre_release) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for VersionInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(label) = &self.pre_release {
            write!(f, "-{}", label)?;
        }
        Ok(())
    }
}

impl FromStr for VersionInfo {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Compares two version strings
pub fn compare(a: &str, b: &str) -> Result<Ordering, VersionError> {
    Ok(VersionInfo::parse(a)?.cmp(&VersionInfo::parse(b)?))
}

/// Sort key giving mixed well-formed/malformed input a total order
#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum SortKey<'a> {
    Valid(VersionInfo, &'a str),
    Malformed(&'a str),
}

impl<'a> SortKey<'a> {
    fn of(raw: &'a str) -> Self {
        match VersionInfo::parse(raw) {
            Ok(version) => SortKey::Valid(version, raw),
            Err(_) => SortKey::Malformed(raw),
        }
    }
}

/// Returns versions in ascending order
///
/// Well-formed versions come first, ordered numerically. Malformed strings
/// follow in plain lexicographic order; their placement is best-effort.
pub fn list_sorted<S: AsRef<str>>(versions: &[S]) -> Vec<String> {
    let mut keyed: Vec<SortKey<'_>> = versions.iter().map(|v| SortKey::of(v.as_ref())).collect();
    keyed.sort();
    keyed
        .into_iter()
        .map(|key| match key {
            SortKey::Valid(_, raw) | SortKey::Malformed(raw) => raw.to_string(),
        })
        .collect()
}

/// Returns the versions that are greater than or equal to `floor`
///
/// Input order is kept. Entries that do not parse are excluded because they
/// cannot be shown to satisfy the bound. A malformed floor is an error.
pub fn filter_at_least<S: AsRef<str>>(
    versions: &[S],
    floor: &str,
) -> Result<Vec<String>, VersionError> {
    let floor = VersionInfo::parse(floor)?;

    Ok(versions
        .iter()
        .map(AsRef::as_ref)
        .filter(|raw| matches!(VersionInfo::parse(raw), Ok(v) if v >= floor))
        .map(str::to_string)
        .collect())
}

/// Returns the greatest well-formed version, if any
pub fn latest<S: AsRef<str>>(versions: &[S]) -> Option<String> {
    versions
        .iter()
        .filter_map(|raw| {
            VersionInfo::parse(raw.as_ref())
                .ok()
                .map(|version| (version, raw.as_ref()))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, raw)| raw.to_string())
}

/// Comparison operator of a [`VersionConstraint`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
    /// `~>`: same major version, at least the given minor/patch
    Compatible,
}

impl ConstraintOp {
    fn symbol(&self) -> &'static str {
        match self {
            ConstraintOp::Eq => "=",
            ConstraintOp::Gt => ">",
            ConstraintOp::Ge => ">=",
            ConstraintOp::Lt => "<",
            ConstraintOp::Le => "<=",
            ConstraintOp::Compatible => "~>",
        }
    }
}

/// A version requirement such as `>=1.2.0` or `~>2.1.0`
///
/// A bare version with no operator means "at least".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConstraint {
    pub op: ConstraintOp,
    pub version: VersionInfo,
}

impl VersionConstraint {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionError::InvalidConstraint {
                input: input.to_string(),
                reason: "constraint is empty".to_string(),
            });
        }

        // Two-character operators must be tried before their one-character prefixes
        const OPERATORS: [(&str, ConstraintOp); 7] = [
            ("~>", ConstraintOp::Compatible),
            (">=", ConstraintOp::Ge),
            ("<=", ConstraintOp::Le),
            ("==", ConstraintOp::Eq),
            (">", ConstraintOp::Gt),
            ("<", ConstraintOp::Lt),
            ("=", ConstraintOp::Eq),
        ];

        let (op, rest) = OPERATORS
            .iter()
            .find_map(|(symbol, op)| trimmed.strip_prefix(symbol).map(|rest| (*op, rest)))
            .unwrap_or((ConstraintOp::Ge, trimmed));

        let version =
            VersionInfo::parse(rest.trim()).map_err(|e| VersionError::InvalidConstraint {
                input: input.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self { op, version })
    }

    pub fn matches(&self, candidate: &VersionInfo) -> bool {
        match self.op {
            ConstraintOp::Eq => candidate == &self.version,
            ConstraintOp::Gt => candidate > &self.version,
            ConstraintOp::Ge => candidate >= &self.version,
            ConstraintOp::Lt => candidate < &self.version,
            ConstraintOp::Le => candidate <= &self.version,
            ConstraintOp::Compatible => {
                candidate.major == self.version.major && candidate >= &self.version
            }
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.symbol(), self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let v = VersionInfo::parse("1.10.3").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 10, 3));
        assert!(v.pre_release.is_none());

        let v = VersionInfo::parse("2.0.0-rc.1").unwrap();
        assert_eq!(v.pre_release.as_deref(), Some("rc.1"));
        assert_eq!(v.to_string(), "2.0.0-rc.1");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(VersionInfo::parse(""), Err(VersionError::Empty));
        assert!(matches!(
            VersionInfo::parse("1.2"),
            Err(VersionError::ComponentCount { found: 2, .. })
        ));
        assert!(matches!(
            VersionInfo::parse("1.2.3.4"),
            Err(VersionError::ComponentCount { found: 4, .. })
        ));
        assert!(matches!(
            VersionInfo::parse("1.x.0"),
            Err(VersionError::InvalidComponent { .. })
        ));
        assert!(matches!(
            VersionInfo::parse("1..0"),
            Err(VersionError::InvalidComponent { .. })
        ));
        assert!(matches!(
            VersionInfo::parse("1.2.+3"),
            Err(VersionError::InvalidComponent { .. })
        ));
        assert!(matches!(
            VersionInfo::parse("1.2.0-"),
            Err(VersionError::InvalidPreRelease { .. })
        ));
    }

    #[test]
    fn test_leading_zeros_rejected() {
        assert!(VersionInfo::parse("1.2.00").is_err());
        assert!(VersionInfo::parse("01.2.0").is_err());
        assert!(VersionInfo::parse("1.0.0").is_ok());
    }

    #[test]
    fn test_numeric_ordering() {
        let sorted = list_sorted(&["1.2.0", "1.10.0", "1.2.10"]);
        assert_eq!(sorted, vec!["1.2.0", "1.2.10", "1.10.0"]);
    }

    #[test]
    fn test_pre_release_sorts_before_release() {
        assert_eq!(compare("1.0.0-beta", "1.0.0"), Ok(Ordering::Less));
        assert_eq!(compare("1.0.0-alpha", "1.0.0-beta"), Ok(Ordering::Less));
        assert_eq!(compare("1.0.0", "1.0.0"), Ok(Ordering::Equal));
        assert_eq!(compare("2.0.0", "1.99.99"), Ok(Ordering::Greater));
    }

    #[test]
    fn test_compare_propagates_parse_errors() {
        assert!(compare("1.0.0", "bogus").is_err());
    }

    #[test]
    fn test_list_sorted_mixed_input() {
        let sorted = list_sorted(&["zeta", "2.0.0", "alpha", "1.0.0", "1.0"]);
        assert_eq!(sorted, vec!["1.0.0", "2.0.0", "1.0", "alpha", "zeta"]);
    }

    #[test]
    fn test_filter_at_least() {
        let filtered = filter_at_least(&["1.0.0", "2.0.0", "0.9.0"], "1.0.0").unwrap();
        assert_eq!(filtered, vec!["1.0.0", "2.0.0"]);
    }

    #[test]
    fn test_filter_at_least_excludes_unparseable() {
        let filtered = filter_at_least(&["3.1.0", "latest", "1.0", "0.1.0"], "0.5.0").unwrap();
        assert_eq!(filtered, vec!["3.1.0"]);
    }

    #[test]
    fn test_filter_at_least_rejects_bad_floor() {
        assert!(filter_at_least(&["1.0.0"], "one").is_err());
    }

    #[test]
    fn test_latest() {
        assert_eq!(
            latest(&["1.2.0", "garbage", "1.10.0", "1.9.9"]),
            Some("1.10.0".to_string())
        );
        assert_eq!(latest::<&str>(&[]), None);
        assert_eq!(latest(&["nope"]), None);
    }

    #[test]
    fn test_bump() {
        let v = VersionInfo::parse("1.4.2-rc.1").unwrap();
        assert_eq!(v.bump(Component::Patch).to_string(), "1.4.3");
        assert_eq!(v.bump(Component::Minor).to_string(), "1.5.0");
        assert_eq!(v.bump(Component::Major).to_string(), "2.0.0");
    }

    #[test]
    fn test_constraint_parse() {
        let c = VersionConstraint::parse(">= 1.2.0").unwrap();
        assert_eq!(c.op, ConstraintOp::Ge);
        assert_eq!(c.to_string(), ">=1.2.0");

        let c = VersionConstraint::parse("1.2.0").unwrap();
        assert_eq!(c.op, ConstraintOp::Ge);

        let c = VersionConstraint::parse("==3.0.0").unwrap();
        assert_eq!(c.op, ConstraintOp::Eq);

        assert!(matches!(
            VersionConstraint::parse(">=abc"),
            Err(VersionError::InvalidConstraint { .. })
        ));
        assert!(VersionConstraint::parse("  ").is_err());
    }

    #[test]
    fn test_constraint_matches() {
        let v = |s: &str| VersionInfo::parse(s).unwrap();

        let ge = VersionConstraint::parse(">=1.2.0").unwrap();
        assert!(ge.matches(&v("1.2.0")));
        assert!(ge.matches(&v("2.0.0")));
        assert!(!ge.matches(&v("1.1.9")));

        let lt = VersionConstraint::parse("<2.0.0").unwrap();
        assert!(lt.matches(&v("1.9.9")));
        assert!(!lt.matches(&v("2.0.0")));

        let compatible = VersionConstraint::parse("~>1.4.0").unwrap();
        assert!(compatible.matches(&v("1.4.0")));
        assert!(compatible.matches(&v("1.9.3")));
        assert!(!compatible.matches(&v("2.0.0")));
        assert!(!compatible.matches(&v("1.3.9")));
    }
}
