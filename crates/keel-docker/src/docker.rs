use crate::command::{label, run_command, CommandOutput};
use keel_core::{KeelError, Result};
use log::{debug, trace};
use std::path::{Path, PathBuf};

/// Thin wrapper around the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl DockerCli {
    /// Locates `docker` on `PATH`.
    pub fn new() -> Result<Self> {
        let program =
            which::which("docker").map_err(|_| KeelError::ToolNotFound("docker".to_string()))?;
        debug!("Using docker at {}", program.display());
        Ok(Self::with_program(program, Vec::new()))
    }

    /// Uses `program` instead of `docker`, prepending `leading_args` to every call.
    pub fn with_program(program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn call(&self, name: &str, args: &[&str], echo: bool) -> Result<CommandOutput> {
        let mut full = self.leading_args.clone();
        full.extend(args.iter().map(|a| a.to_string()));
        trace!("docker {}", args.join(" "));
        run_command(&label(name), &self.program, &full, echo).await
    }

    /// Asks the registry for the manifest without pulling the image.
    pub async fn manifest_inspect(&self, reference: &str) -> Result<CommandOutput> {
        self.call("manifest", &["manifest", "inspect", reference], false)
            .await
    }

    pub async fn build(&self, tag: &str, dockerfile: &Path, context: &Path) -> Result<CommandOutput> {
        let dockerfile = dockerfile.display().to_string();
        let context = context.display().to_string();
        self.call(
            "build",
            &["build", "-t", tag, "-f", dockerfile.as_str(), context.as_str()],
            true,
        )
        .await
    }

    pub async fn image_id(&self, tag: &str) -> Result<Option<String>> {
        let out = self
            .call("inspect", &["image", "inspect", "--format", "{{.Id}}", tag], false)
            .await?;
        if !out.success() {
            return Ok(None);
        }
        Ok(out
            .output
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }
}
