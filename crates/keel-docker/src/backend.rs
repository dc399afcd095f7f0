use crate::context::BuildContext;
use crate::docker::DockerCli;
use async_trait::async_trait;
use keel_build::{render_dockerfile, BaseImageReference, BuildPlan, BuildStep, StepBackend, StepKind};
use keel_core::{KeelError, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// Builds the image with `docker build`.
///
/// Steps are checked and staged one at a time. Commands and the identity are
/// carried out by docker itself, in the same order, when the rendered
/// Dockerfile is built in `finalize`. Docker only tags the image once the
/// whole build succeeded.
pub struct DockerBackend {
    docker: DockerCli,
    project_dir: PathBuf,
    context: BuildContext,
    verify_base: bool,
    pending_commands: Vec<String>,
    identity: Option<String>,
}

impl DockerBackend {
    pub fn new(docker: DockerCli, project_dir: &Path, context: BuildContext) -> Self {
        Self {
            docker,
            project_dir: project_dir.to_path_buf(),
            context,
            verify_base: true,
            pending_commands: Vec::new(),
            identity: None,
        }
    }

    /// Skips the registry lookup for the base image.
    pub fn skip_base_check(mut self) -> Self {
        self.verify_base = false;
        self
    }

    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    pub fn pending_commands(&self) -> &[String] {
        &self.pending_commands
    }
}

#[async_trait]
impl StepBackend for DockerBackend {
    async fn resolve_base(&mut self, reference: &BaseImageReference) -> Result<()> {
        if !self.verify_base {
            warn!("Not checking that {} exists", reference);
            return Ok(());
        }

        let out = self.docker.manifest_inspect(&reference.to_string()).await?;
        if out.success() {
            debug!("Base image {} resolved", reference);
            Ok(())
        } else {
            Err(KeelError::UnresolvedBaseReference {
                reference: reference.to_string(),
                detail: out.output,
            })
        }
    }

    async fn materialize(
        &mut self,
        _step: &BuildStep,
        source: &Path,
        target: &str,
        directory: bool,
    ) -> Result<()> {
        let staged = self.context.stage(&self.project_dir, source, directory)?;
        debug!("{} staged as {} for {}", source.display(), staged.display(), target);
        Ok(())
    }

    async fn execute(&mut self, step: &BuildStep, argv: &[String]) -> Result<()> {
        debug!("`{}` runs during the image build", step.id());
        self.pending_commands.push(argv.join(" "));
        Ok(())
    }

    async fn set_identity(&mut self, user: &str) -> Result<()> {
        self.identity = Some(user.to_string());
        Ok(())
    }

    async fn finalize(&mut self, plan: &BuildPlan, tag: &str) -> Result<Option<String>> {
        let dockerfile = render_dockerfile(plan)?;
        let path = self.context.write_dockerfile(&dockerfile)?;
        info!(
            "Building {} as user `{}`",
            tag,
            self.identity.as_deref().unwrap_or_default()
        );

        let out = self.docker.build(tag, &path, self.context.path()).await?;
        if !out.success() {
            return Err(classify_build_failure(plan, out.code, out.output));
        }

        self.docker.image_id(tag).await
    }
}

/// Markers BuildKit and the legacy builder print when a `RUN` step fails.
const RUN_FAILURE_MARKERS: [&str; 3] = [
    "did not complete successfully",
    "returned a non-zero code",
    "exit code:",
];

/// Markers that only appear when the base image itself could not be pulled.
const BASE_FAILURE_MARKERS: [&str; 4] = [
    "failed to resolve source metadata",
    "pull access denied",
    "manifest unknown",
    ": not found",
];

/// Maps a failed `docker build` onto the error taxonomy.
///
/// A failing `RUN` is attributed to the installer, the only command a plan
/// queues. Otherwise a base is only blamed when one error line both names it
/// and carries a pull failure marker; the `FROM` progress line naming the
/// base is printed by every build and proves nothing.
pub fn classify_build_failure(plan: &BuildPlan, code: Option<i32>, output: String) -> KeelError {
    let lowered = output.to_lowercase();

    let installer = plan.steps().iter().find_map(|step| match step.kind() {
        StepKind::ExecuteCommand { argv } => Some(argv.join(" ")),
        _ => None,
    });
    if let Some(command) = installer {
        if RUN_FAILURE_MARKERS.iter().any(|m| lowered.contains(m)) {
            return KeelError::InstallerFailed {
                command,
                code,
                output,
            };
        }
    }

    if let Some(base) = plan.base() {
        let reference = base.to_string().to_lowercase();
        let base_failed = lowered.lines().any(|line| {
            line.contains(&reference) && BASE_FAILURE_MARKERS.iter().any(|m| line.contains(m))
        });
        if base_failed {
            return KeelError::UnresolvedBaseReference {
                reference: base.to_string(),
                detail: output,
            };
        }
    }

    KeelError::BuildFailed { code, output }
}
