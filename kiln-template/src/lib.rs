//! Kiln template tooling
//!
//! Turns template documents into validated [`Template`] values and computes
//! the order in which a set of templates has to be built.
//!
//! - [`parser`]: document -> `Template`, and back
//! - [`render`]: parameter resolution and `{{name}}` substitution
//! - [`catalog`]: the set of known templates, loaded from a directory
//! - [`resolver`]: dependency ordering with cycle detection

pub mod catalog;
pub mod error;
pub mod parser;
pub mod render;
pub mod resolver;

pub use catalog::TemplateCatalog;
pub use error::{CatalogError, ParseError, RenderError, ResolveError};
pub use kiln_core::domain::template::Template;
pub use parser::{parse_template, to_document};
pub use resolver::{resolve, resolve_plan};
