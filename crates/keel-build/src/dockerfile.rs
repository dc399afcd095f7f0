use crate::templates::{templates, DOCKERFILE_TEMPLATE};
use crate::BuildPlan;
use keel_core::{KeelError, Result};
use log::trace;
use tera::Context;

/// Renders a validated plan as a Dockerfile, one instruction per step.
pub fn render_dockerfile(plan: &BuildPlan) -> Result<String> {
    let context = Context::from_serialize(plan)
        .map_err(|e| KeelError::Template(format!("Could not create template context: {e}")))?;
    let rendered = templates()?
        .render(DOCKERFILE_TEMPLATE, &context)
        .map_err(|e| KeelError::Template(format!("Could not render Dockerfile: {e:?}")))?;
    trace!("Rendered Dockerfile:\n{}", rendered);
    Ok(rendered)
}
