//! Template catalog
//!
//! The set of every known template, keyed by name. This is the global view
//! the resolver needs to check dependency names.

use kiln_core::domain::template::Template;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::CatalogError;
use crate::parser::parse_template;

/// Saved-image definitions share the templates directory but are not templates
pub const SAVED_DEFINITION_SUFFIX: &str = ".saved.yaml";

#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, Template>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from templates, rejecting duplicate names
    pub fn from_templates(
        templates: impl IntoIterator<Item = Template>,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        for template in templates {
            catalog.insert(template)?;
        }
        Ok(catalog)
    }

    /// Loads every `*.yml` / `*.yaml` file in `dir` (not recursive)
    ///
    /// Files ending in [`SAVED_DEFINITION_SUFFIX`] are skipped.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let dir = dir.as_ref();
        let io_err = |source| CatalogError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yml") | Some("yaml")
            );
            let is_saved = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(SAVED_DEFINITION_SUFFIX));
            if is_yaml && !is_saved && path.is_file() {
                paths.push(path);
            }
        }
        // Directory order is platform dependent
        paths.sort();

        let mut catalog = Self::new();
        for path in paths {
            let document = std::fs::read_to_string(&path).map_err(|source| CatalogError::Io {
                path: path.clone(),
                source,
            })?;
            let template = parse_template(&document).map_err(|source| CatalogError::Parse {
                path: path.clone(),
                source,
            })?;
            debug!("Loaded template '{}' from {}", template.name, path.display());
            catalog.insert(template)?;
        }

        Ok(catalog)
    }

    pub fn insert(&mut self, template: Template) -> Result<(), CatalogError> {
        if self.templates.contains_key(&template.name) {
            return Err(CatalogError::Duplicate(template.name));
        }
        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Template names in ascending order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, file: &str, name: &str) {
        std::fs::write(
            dir.join(file),
            format!("name: {}\nbase: ubuntu\nbuild_steps:\n  - {{name: s, script: x}}\n", name),
        )
        .unwrap();
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "base.yml", "base");
        write(dir.path(), "app.yaml", "app");
        std::fs::write(dir.path().join("README.md"), "not a template").unwrap();
        std::fs::write(dir.path().join("workstation.saved.yaml"), "name: workstation\n").unwrap();

        let catalog = TemplateCatalog::load_dir(dir.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["app", "base"]);
        assert!(catalog.contains("base"));
    }

    #[test]
    fn test_load_dir_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yml", "same");
        write(dir.path(), "b.yml", "same");

        let err = TemplateCatalog::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, CatalogError::Duplicate(name) if name == "same"));
    }

    #[test]
    fn test_load_dir_reports_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.yml"), "name: x\nbase: y\n").unwrap();

        let err = TemplateCatalog::load_dir(dir.path()).unwrap_err();
        match err {
            CatalogError::Parse { path, .. } => assert!(path.ends_with("broken.yml")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_dir() {
        let err = TemplateCatalog::load_dir("/nonexistent/kiln/templates").unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));
    }
}
