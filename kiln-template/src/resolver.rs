//! Dependency graph resolver
//!
//! Computes a build order from a target template: a depth-first walk that
//! emits each template after all of its dependencies (post-order). Every
//! dependency precedes its dependents, shared dependencies appear once, and
//! the target is always last.

use kiln_core::domain::template::{Dependency, Template};
use kiln_core::domain::version::{VersionConstraint, VersionInfo};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::catalog::TemplateCatalog;
use crate::error::ResolveError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

struct Walk<'a> {
    catalog: &'a TemplateCatalog,
    marks: HashMap<&'a str, Mark>,
    /// Templates currently being visited, outermost first
    path: Vec<&'a str>,
    order: Vec<&'a Template>,
}

impl<'a> Walk<'a> {
    fn visit(&mut self, template: &'a Template) -> Result<(), ResolveError> {
        let name = template.name.as_str();
        match self.marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = self.path.iter().position(|n| *n == name).unwrap_or(0);
                return Err(ResolveError::Cycle {
                    members: self.path[start..].iter().map(|n| n.to_string()).collect(),
                });
            }
            None => {}
        }

        self.marks.insert(name, Mark::InProgress);
        self.path.push(name);

        let catalog = self.catalog;
        for dependency in &template.dependencies {
            let resolved = catalog.get(&dependency.name).ok_or_else(|| {
                ResolveError::MissingDependency {
                    missing: dependency.name.clone(),
                    referrer: name.to_string(),
                }
            })?;
            check_constraint(name, dependency, resolved)?;
            self.visit(resolved)?;
        }

        self.path.pop();
        self.marks.insert(name, Mark::Done);
        self.order.push(template);
        Ok(())
    }
}

fn check_constraint(
    referrer: &str,
    dependency: &Dependency,
    resolved: &Template,
) -> Result<(), ResolveError> {
    let Some(raw) = &dependency.version else {
        return Ok(());
    };

    let constraint =
        VersionConstraint::parse(raw).map_err(|source| ResolveError::InvalidConstraint {
            dependency: dependency.name.clone(),
            referrer: referrer.to_string(),
            source,
        })?;

    let Some(found) = &resolved.version else {
        warn!(
            "Template '{}' constrains '{}' to {} but '{}' declares no version",
            referrer, dependency.name, constraint, dependency.name
        );
        return Ok(());
    };

    let version = VersionInfo::parse(found).map_err(|source| ResolveError::InvalidVersion {
        template: resolved.name.clone(),
        source,
    })?;

    if !constraint.matches(&version) {
        return Err(ResolveError::VersionMismatch {
            dependency: dependency.name.clone(),
            referrer: referrer.to_string(),
            constraint: constraint.to_string(),
            found: found.clone(),
        });
    }

    Ok(())
}

fn walk<'a>(target: &str, catalog: &'a TemplateCatalog) -> Result<Vec<&'a Template>, ResolveError> {
    let template = catalog
        .get(target)
        .ok_or_else(|| ResolveError::UnknownTemplate(target.to_string()))?;

    let mut walk = Walk {
        catalog,
        marks: HashMap::new(),
        path: Vec::new(),
        order: Vec::new(),
    };
    walk.visit(template)?;

    debug!(
        "Resolved build order for '{}': {}",
        target,
        walk.order
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(walk.order)
}

/// Compute the build order for `target`
///
/// Returns template names, dependencies first and `target` last.
///
/// # Errors
/// - [`ResolveError::UnknownTemplate`] if `target` is not in the catalog
/// - [`ResolveError::MissingDependency`] naming the missing template and its referrer
/// - [`ResolveError::Cycle`] naming every template on the cycle
/// - [`ResolveError::VersionMismatch`] when a dependency's version violates a constraint
pub fn resolve(target: &str, catalog: &TemplateCatalog) -> Result<Vec<String>, ResolveError> {
    Ok(walk(target, catalog)?
        .into_iter()
        .map(|t| t.name.clone())
        .collect())
}

/// Like [`resolve`], but returns template snapshots ready to be built
pub fn resolve_plan(target: &str, catalog: &TemplateCatalog) -> Result<Vec<Template>, ResolveError> {
    Ok(walk(target, catalog)?.into_iter().cloned().collect())
}
