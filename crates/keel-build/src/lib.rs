pub mod dockerfile;
pub mod executor;
pub mod plan;
pub mod reference;
pub mod step;
mod templates;

pub use dockerfile::render_dockerfile;
pub use executor::{Executor, FinalImage, ImageState, StepBackend};
pub use plan::{BuildPlan, Label};
pub use reference::BaseImageReference;
pub use step::{BuildStep, StepKind};
