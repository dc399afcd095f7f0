use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KeelError>;

/// Coarse classification of a failure, used when reporting to the caller.
///
/// A manifest that is missing at install time is reported with the same kind
/// as a failing installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parameter,
    Plan,
    UnresolvedBase,
    Installer,
    Materialization,
    Build,
    Environment,
}

#[derive(Debug, Error)]
pub enum KeelError {
    #[error("Missing required build parameter `{0}`")]
    MissingParameter(String),

    #[error("Invalid value {value:?} for build parameter `{name}`: {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid build plan: {0}")]
    InvalidPlan(String),

    #[error("Step `{step}` reads `{path}` which no earlier step produces")]
    InputNotProduced { step: String, path: String },

    #[error("Base image reference `{reference}` could not be resolved: {detail}")]
    UnresolvedBaseReference { reference: String, detail: String },

    #[error("Installer command `{command}` failed with exit code {code:?}\n{output}")]
    InstallerFailed {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Dependency manifest `{path}` not found in the image when step `{step}` ran")]
    ManifestNotFound { step: String, path: String },

    #[error("Failed to materialize `{}`: {reason}", source_path.display())]
    MaterializationFailed { source_path: PathBuf, reason: String },

    #[error("Image build failed with exit code {code:?}\n{output}")]
    BuildFailed { code: Option<i32>, output: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Tool `{0}` was not found on PATH")]
    ToolNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KeelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeelError::MissingParameter(_) | KeelError::InvalidParameter { .. } => {
                ErrorKind::Parameter
            }
            KeelError::InvalidPlan(_) => ErrorKind::Plan,
            // A command reading an input nobody produced fails like the
            // installer would at run time.
            KeelError::InputNotProduced { .. }
            | KeelError::InstallerFailed { .. }
            | KeelError::ManifestNotFound { .. } => ErrorKind::Installer,
            KeelError::UnresolvedBaseReference { .. } => ErrorKind::UnresolvedBase,
            KeelError::MaterializationFailed { .. } => ErrorKind::Materialization,
            KeelError::BuildFailed { .. } => ErrorKind::Build,
            KeelError::Config(_)
            | KeelError::Template(_)
            | KeelError::ToolNotFound(_)
            | KeelError::Io(_) => ErrorKind::Environment,
        }
    }

    /// True when the failure means a required file was absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            KeelError::InputNotProduced { .. }
            | KeelError::ManifestNotFound { .. }
            | KeelError::MaterializationFailed { .. } => true,
            KeelError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
