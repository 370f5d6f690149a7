//! Parameter rendering
//!
//! Step and validation scripts may reference template parameters as
//! `{{name}}` (whitespace inside the braces is allowed). Values come from the
//! template's defaults, overridden by request values for declared parameters.

use kiln_core::domain::template::Template;
use std::collections::BTreeMap;

use crate::error::RenderError;

/// Merge template defaults with request overrides
///
/// Overrides for parameters the template does not declare are rejected.
pub fn resolve_parameters(
    template: &Template,
    overrides: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, RenderError> {
    let mut values = template.parameters.clone();

    for (name, value) in overrides {
        match values.get_mut(name) {
            Some(slot) => *slot = value.clone(),
            None => {
                return Err(RenderError::UndeclaredParameter {
                    template: template.name.clone(),
                    name: name.clone(),
                });
            }
        }
    }

    Ok(values)
}

/// Substitute `{{name}}` placeholders
///
/// Placeholders naming unknown parameters are left untouched so that scripts
/// using the same brace syntax for other tools keep working.
pub fn render_script(script: &str, values: &BTreeMap<String, String>) -> String {
    let mut rendered = String::with_capacity(script.len());
    let mut rest = script;

    while let Some(start) = rest.find("{{") {
        let (before, after_open) = rest.split_at(start);
        rendered.push_str(before);

        let body = &after_open[2..];
        match body.find("}}") {
            Some(end) => {
                let key = body[..end].trim();
                match values.get(key) {
                    Some(value) => rendered.push_str(value),
                    None => rendered.push_str(&after_open[..end + 4]),
                }
                rest = &body[end + 2..];
            }
            None => {
                rendered.push_str(after_open);
                rest = "";
            }
        }
    }

    rendered.push_str(rest);
    rendered
}

/// Returns a copy of the template with every step and validation script rendered
pub fn render_template(template: &Template, values: &BTreeMap<String, String>) -> Template {
    let mut rendered = template.clone();
    for step in &mut rendered.build_steps {
        step.script = render_script(&step.script, values);
    }
    for test in &mut rendered.validation {
        test.script = render_script(&test.script, values);
    }
    rendered
}
