use keel_core::{KeelError, Result};
use lazy_static::lazy_static;
use std::collections::HashMap;
use tera::{Tera, Value};

pub const DOCKERFILE_TEMPLATE: &str = "Dockerfile";

lazy_static! {
    static ref TEMPLATES: std::result::Result<Tera, String> = build_templates();
}

fn build_templates() -> std::result::Result<Tera, String> {
    let mut tera = Tera::default();
    tera.add_raw_template(DOCKERFILE_TEMPLATE, include_str!("templates/Dockerfile.tera"))
        .map_err(|e| format!("Parsing error(s): {}", e))?;

    tera.register_filter("copy_paths", copy_paths_filter);

    Ok(tera)
}

pub fn templates() -> Result<&'static Tera> {
    TEMPLATES
        .as_ref()
        .map_err(|e| KeelError::Template(e.clone()))
}

/// Turns a materialize step into the JSON argument list of a `COPY`.
///
/// Build contexts always use `/` separators, whatever the host uses.
pub fn copy_paths_filter(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let field = |name: &str| {
        value.get(name).and_then(Value::as_str).ok_or_else(|| {
            tera::Error::msg(format!(
                "Filter `copy_paths` expected a step with a `{}` string, got {}",
                name, value
            ))
        })
    };
    let source = field("source")?.replace('\\', "/");
    let target = field("target")?;
    let encoded = serde_json::to_string(&[source.as_str(), target])
        .map_err(|e| tera::Error::msg(format!("Filter `copy_paths` could not encode paths: {}", e)))?;
    Ok(Value::String(encoded))
}
