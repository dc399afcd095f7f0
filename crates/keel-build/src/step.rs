use crate::BaseImageReference;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    SelectBase {
        reference: BaseImageReference,
    },
    MaterializeFile {
        source: PathBuf,
        target: String,
        owner: Option<String>,
    },
    MaterializeDirectory {
        source: PathBuf,
        target: String,
        owner: Option<String>,
    },
    ExecuteCommand {
        argv: Vec<String>,
    },
    SetIdentity {
        user: String,
    },
}

/// A single unit of work in a build plan.
///
/// `inputs` are in-image paths the step reads. They must be produced by an
/// earlier step of the same plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildStep {
    id: String,
    #[serde(flatten)]
    kind: StepKind,
    inputs: Vec<String>,
}

impl BuildStep {
    pub fn new(id: &str, kind: StepKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            inputs: Vec::new(),
        }
    }

    pub fn select_base(id: &str, reference: BaseImageReference) -> Self {
        Self::new(id, StepKind::SelectBase { reference })
    }

    pub fn materialize_file(id: &str, source: impl Into<PathBuf>, target: &str) -> Self {
        Self::new(
            id,
            StepKind::MaterializeFile {
                source: source.into(),
                target: target.to_string(),
                owner: None,
            },
        )
    }

    pub fn materialize_directory(
        id: &str,
        source: impl Into<PathBuf>,
        target: &str,
        owner: Option<&str>,
    ) -> Self {
        Self::new(
            id,
            StepKind::MaterializeDirectory {
                source: source.into(),
                target: target.to_string(),
                owner: owner.map(str::to_string),
            },
        )
    }

    pub fn execute(id: &str, argv: Vec<String>) -> Self {
        Self::new(id, StepKind::ExecuteCommand { argv })
    }

    pub fn set_identity(id: &str, user: &str) -> Self {
        Self::new(
            id,
            StepKind::SetIdentity {
                user: user.to_string(),
            },
        )
    }

    /// Declares an in-image path this step reads.
    pub fn reads(mut self, path: &str) -> Self {
        self.inputs.push(path.to_string());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// In-image path this step makes available to later steps.
    pub fn output(&self) -> Option<&str> {
        match &self.kind {
            StepKind::MaterializeFile { target, .. }
            | StepKind::MaterializeDirectory { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match &self.kind {
            StepKind::SelectBase { reference } => format!("select base {reference}"),
            StepKind::MaterializeFile { source, target, .. } => {
                format!("copy file {} -> {}", source.display(), target)
            }
            StepKind::MaterializeDirectory { source, target, .. } => {
                format!("copy directory {} -> {}", source.display(), target)
            }
            StepKind::ExecuteCommand { argv } => format!("run {}", argv.join(" ")),
            StepKind::SetIdentity { user } => format!("set user {user}"),
        }
    }
}

/// True when `path` is `produced` or lies beneath it.
pub fn covers(produced: &str, path: &str) -> bool {
    let produced = produced.trim_end_matches('/');
    path == produced
        || path
            .strip_prefix(produced)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers() {
        assert!(covers("/requirements.txt", "/requirements.txt"));
        assert!(covers("/opt/airflow/dags", "/opt/airflow/dags/etl.py"));
        assert!(covers("/opt/airflow/dags/", "/opt/airflow/dags/etl.py"));
        assert!(!covers("/opt/airflow/dags", "/opt/airflow/dagsx"));
        assert!(!covers("/requirements.txt", "/requirements"));
    }

    #[test]
    fn test_output_of_materialization_only() {
        let copy = BuildStep::materialize_file("copy", "requirements.txt", "/requirements.txt");
        assert_eq!(copy.output(), Some("/requirements.txt"));

        let run = BuildStep::execute("run", vec!["true".to_string()]).reads("/requirements.txt");
        assert_eq!(run.output(), None);
        assert_eq!(run.inputs(), ["/requirements.txt".to_string()]);
    }
}
