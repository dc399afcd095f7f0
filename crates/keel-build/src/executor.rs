use crate::step::{covers, BuildStep, StepKind};
use crate::{BaseImageReference, BuildPlan};
use async_trait::async_trait;
use keel_core::{KeelError, Result};
use log::{debug, error, info};
use serde::Serialize;
use std::path::Path;

/// The collaborator that carries out individual steps.
///
/// The executor calls these strictly in plan order and never concurrently.
/// `finalize` is only reached when every step has succeeded.
#[async_trait]
pub trait StepBackend: Send {
    /// Confirms the base image exists.
    async fn resolve_base(&mut self, reference: &BaseImageReference) -> Result<()>;

    /// Copies `source` (relative to the build context) to `target` in the image.
    async fn materialize(
        &mut self,
        step: &BuildStep,
        source: &Path,
        target: &str,
        directory: bool,
    ) -> Result<()>;

    async fn execute(&mut self, step: &BuildStep, argv: &[String]) -> Result<()>;

    async fn set_identity(&mut self, user: &str) -> Result<()>;

    /// Produces the image. Returns its id when the backend knows one.
    async fn finalize(&mut self, plan: &BuildPlan, tag: &str) -> Result<Option<String>>;
}

/// What the image looks like after the steps run so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageState {
    pub base: Option<BaseImageReference>,
    pub paths: Vec<String>,
    pub layers: Vec<String>,
    pub user: Option<String>,
}

/// The image produced by a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalImage {
    pub tag: String,
    pub base: BaseImageReference,
    pub layers: Vec<String>,
    pub paths: Vec<String>,
    pub user: String,
    pub image_id: Option<String>,
}

impl FinalImage {
    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| covers(p, path))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| KeelError::Config(format!("Could not serialize image report: {e}")))
    }
}

pub struct Executor<B: StepBackend> {
    backend: B,
}

impl<B: StepBackend> Executor<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Runs every step in order. The first failure aborts the build and no
    /// image is produced.
    pub async fn run(&mut self, plan: &BuildPlan, tag: &str) -> Result<FinalImage> {
        let total = plan.steps().len();
        let mut state = ImageState::default();

        for (index, step) in plan.steps().iter().enumerate() {
            info!("[{}/{}] {}", index + 1, total, step.describe());
            if let Err(e) = self.run_step(step, &mut state).await {
                error!("Step `{}` failed: {}", step.id(), e);
                return Err(e);
            }
            state.layers.push(step.describe());
        }

        let (base, user) = match (state.base.clone(), state.user.clone()) {
            (Some(base), Some(user)) => (base, user),
            _ => {
                return Err(KeelError::InvalidPlan(
                    "plan finished without a base image or execution identity".to_string(),
                ))
            }
        };

        let image_id = self.backend.finalize(plan, tag).await?;
        info!("Built {} as user `{}`", tag, user);

        Ok(FinalImage {
            tag: tag.to_string(),
            base,
            layers: state.layers,
            paths: state.paths,
            user,
            image_id,
        })
    }

    async fn run_step(&mut self, step: &BuildStep, state: &mut ImageState) -> Result<()> {
        match step.kind() {
            StepKind::SelectBase { reference } => {
                self.backend.resolve_base(reference).await?;
                state.base = Some(reference.clone());
            }
            StepKind::MaterializeFile { source, target, .. } => {
                self.backend.materialize(step, source, target, false).await?;
                state.paths.push(target.clone());
            }
            StepKind::MaterializeDirectory { source, target, .. } => {
                self.backend.materialize(step, source, target, true).await?;
                state.paths.push(target.clone());
            }
            // Plan validation guarantees the command's inputs were materialized.
            StepKind::ExecuteCommand { argv } => {
                debug!("Running {:?}", argv);
                self.backend.execute(step, argv).await?;
            }
            StepKind::SetIdentity { user } => {
                self.backend.set_identity(user).await?;
                state.user = Some(user.clone());
            }
        }
        Ok(())
    }
}
