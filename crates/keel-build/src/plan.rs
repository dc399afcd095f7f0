use crate::step::{covers, BuildStep, StepKind};
use crate::BaseImageReference;
use keel_config::{BuildParameters, ImagePolicy};
use keel_core::{KeelError, Result};
use log::{debug, trace};
use serde::Serialize;
use std::collections::HashSet;

pub const SELECT_BASE: &str = "select-base";
pub const MATERIALIZE_MANIFEST: &str = "materialize-manifest";
pub const INSTALL_DEPENDENCIES: &str = "install-dependencies";
pub const SET_IDENTITY: &str = "set-identity";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

/// An ordered, validated sequence of build steps.
///
/// A plan always starts by selecting the base image, ends by restricting the
/// execution identity, and every declared step input is produced by an
/// earlier step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    steps: Vec<BuildStep>,
    labels: Vec<Label>,
}

impl BuildPlan {
    pub fn new(steps: Vec<BuildStep>) -> Result<Self> {
        validate(&steps)?;
        Ok(Self {
            steps,
            labels: Vec::new(),
        })
    }

    /// Builds the image plan for one set of parameters.
    pub fn compose(params: &BuildParameters, policy: &ImagePolicy) -> Result<Self> {
        policy.validate()?;
        let reference = BaseImageReference::select(params, policy);
        debug!("Composing build plan on top of {}", reference);

        let mut steps = vec![BuildStep::select_base(SELECT_BASE, reference.clone())];

        // The manifest is copied even when nothing is installed so it ships
        // with every image.
        steps.push(BuildStep::materialize_file(
            MATERIALIZE_MANIFEST,
            policy.manifest.path.clone(),
            &policy.manifest.target,
        ));

        for source in policy.enabled_sources() {
            let id = format!("materialize-{}", source_id(&source.target));
            trace!("Adding source tree {} as {}", source.path.display(), id);
            steps.push(BuildStep::materialize_directory(
                &id,
                source.path.clone(),
                &source.target,
                Some(&policy.restricted_user),
            ));
        }

        if params.install_flag().is_enabled() {
            steps.push(
                BuildStep::execute(INSTALL_DEPENDENCIES, installer_argv(params, policy))
                    .reads(&policy.manifest.target),
            );
        } else {
            debug!("Install flag is disabled, skipping dependency installation");
        }

        steps.push(BuildStep::set_identity(SET_IDENTITY, &policy.restricted_user));

        let mut plan = Self::new(steps)?;
        plan.labels = vec![
            label("org.opencontainers.image.base.name", &reference.to_string()),
            label("io.keel.distribution-version", params.distribution_version()),
            label("io.keel.runtime-version", params.runtime_version()),
            label("io.keel.install-flag", &params.install_flag().to_string()),
        ];
        Ok(plan)
    }

    pub fn steps(&self) -> &[BuildStep] {
        &self.steps
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn base(&self) -> Option<&BaseImageReference> {
        self.steps.iter().find_map(|step| match step.kind() {
            StepKind::SelectBase { reference } => Some(reference),
            _ => None,
        })
    }

    pub fn identity(&self) -> Option<&str> {
        self.steps.last().and_then(|step| match step.kind() {
            StepKind::SetIdentity { user } => Some(user.as_str()),
            _ => None,
        })
    }

    pub fn has_commands(&self) -> bool {
        self.steps
            .iter()
            .any(|step| matches!(step.kind(), StepKind::ExecuteCommand { .. }))
    }

    pub fn describe(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{:>2}. [{}] {}", i + 1, step.id(), step.describe()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn label(key: &str, value: &str) -> Label {
    Label {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn source_id(target: &str) -> String {
    target
        .trim_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("root")
        .to_string()
}

/// `<installer...> <package>[<extras>]==<version> -r <manifest>`
///
/// The pin keeps the installer from swapping out the distribution that ships
/// with the base image.
pub fn installer_argv(params: &BuildParameters, policy: &ImagePolicy) -> Vec<String> {
    let requirement = match params.feature_extras() {
        Some(extras) => format!(
            "{}[{}]=={}",
            policy.distribution_package,
            extras,
            params.distribution_version()
        ),
        None => format!(
            "{}=={}",
            policy.distribution_package,
            params.distribution_version()
        ),
    };

    let mut argv = policy.installer.clone();
    argv.push(requirement);
    argv.push("-r".to_string());
    argv.push(policy.manifest.target.clone());
    argv
}

fn validate(steps: &[BuildStep]) -> Result<()> {
    match steps.first().map(BuildStep::kind) {
        Some(StepKind::SelectBase { .. }) => {}
        Some(_) => {
            return Err(KeelError::InvalidPlan(
                "the first step must select the base image".to_string(),
            ))
        }
        None => return Err(KeelError::InvalidPlan("the plan has no steps".to_string())),
    }

    let mut ids = HashSet::new();
    let mut produced: Vec<&str> = Vec::new();
    let last = steps.len() - 1;

    for (index, step) in steps.iter().enumerate() {
        if !ids.insert(step.id()) {
            return Err(KeelError::InvalidPlan(format!(
                "duplicate step id `{}`",
                step.id()
            )));
        }

        match step.kind() {
            StepKind::SelectBase { .. } if index != 0 => {
                return Err(KeelError::InvalidPlan(format!(
                    "step `{}` selects a second base image",
                    step.id()
                )))
            }
            StepKind::SetIdentity { .. } if index != last => {
                return Err(KeelError::InvalidPlan(format!(
                    "step `{}` sets the identity but is not the last step",
                    step.id()
                )))
            }
            _ => {}
        }

        if let Some(missing) = step
            .inputs()
            .iter()
            .find(|input| !produced.iter().any(|p| covers(p, input)))
        {
            let (id, path) = (step.id().to_string(), missing.clone());
            return Err(match step.kind() {
                StepKind::ExecuteCommand { .. } => KeelError::ManifestNotFound { step: id, path },
                _ => KeelError::InputNotProduced { step: id, path },
            });
        }

        if let Some(output) = step.output() {
            produced.push(output);
        }
    }

    if !matches!(steps[last].kind(), StepKind::SetIdentity { .. }) {
        return Err(KeelError::InvalidPlan(
            "the last step must set the execution identity".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_config::InstallFlag;
    use keel_core::ErrorKind;

    fn params(flag: InstallFlag, extras: Option<&str>) -> BuildParameters {
        BuildParameters::new("2.8.1", "3.10", extras, flag).unwrap()
    }

    fn base() -> BuildStep {
        BuildStep::select_base(
            SELECT_BASE,
            BaseImageReference::compose("apache/airflow", "2.8.1", "python", "3.10"),
        )
    }

    fn ids(plan: &BuildPlan) -> Vec<&str> {
        plan.steps().iter().map(BuildStep::id).collect()
    }

    #[test]
    fn test_compose_without_install() {
        let plan = BuildPlan::compose(&params(InstallFlag::Disabled, None), &ImagePolicy::default())
            .unwrap();
        assert_eq!(ids(&plan), vec![SELECT_BASE, MATERIALIZE_MANIFEST, SET_IDENTITY]);
        assert!(!plan.has_commands());
        assert_eq!(plan.identity(), Some("airflow"));
    }

    #[test]
    fn test_compose_with_install_orders_after_manifest() {
        let plan = BuildPlan::compose(
            &params(InstallFlag::Enabled, Some("snowflake")),
            &ImagePolicy::default(),
        )
        .unwrap();
        assert_eq!(
            ids(&plan),
            vec![SELECT_BASE, MATERIALIZE_MANIFEST, INSTALL_DEPENDENCIES, SET_IDENTITY]
        );

        let install = &plan.steps()[2];
        assert_eq!(install.inputs(), ["/requirements.txt".to_string()]);
        match install.kind() {
            StepKind::ExecuteCommand { argv } => assert_eq!(
                argv,
                &vec![
                    "pip",
                    "install",
                    "--no-cache-dir",
                    "apache-airflow[snowflake]==2.8.1",
                    "-r",
                    "/requirements.txt"
                ]
            ),
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_installer_without_extras() {
        let argv = installer_argv(&params(InstallFlag::Enabled, None), &ImagePolicy::default());
        assert!(argv.contains(&"apache-airflow==2.8.1".to_string()));
    }

    #[test]
    fn test_enabled_sources_are_materialized_before_identity() {
        let mut policy = ImagePolicy::default();
        policy.sources[0].enabled = true;

        let plan = BuildPlan::compose(&params(InstallFlag::Enabled, None), &policy).unwrap();
        assert_eq!(
            ids(&plan),
            vec![
                SELECT_BASE,
                MATERIALIZE_MANIFEST,
                "materialize-dags",
                INSTALL_DEPENDENCIES,
                SET_IDENTITY
            ]
        );
        match plan.steps()[2].kind() {
            StepKind::MaterializeDirectory { owner, target, .. } => {
                assert_eq!(owner.as_deref(), Some("airflow"));
                assert_eq!(target, "/opt/airflow/dags");
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_install_before_manifest_is_rejected() {
        let err = BuildPlan::new(vec![
            base(),
            BuildStep::execute(INSTALL_DEPENDENCIES, vec!["pip".into()])
                .reads("/requirements.txt"),
            BuildStep::materialize_file(MATERIALIZE_MANIFEST, "requirements.txt", "/requirements.txt"),
            BuildStep::set_identity(SET_IDENTITY, "airflow"),
        ])
        .unwrap_err();

        assert!(matches!(err, KeelError::ManifestNotFound { ref path, .. } if path == "/requirements.txt"));
        assert!(err.is_not_found());
        assert_eq!(err.kind(), ErrorKind::Installer);
    }

    #[test]
    fn test_copy_reading_unproduced_path_is_rejected() {
        let err = BuildPlan::new(vec![
            base(),
            BuildStep::materialize_file("copy-config", "airflow.cfg", "/opt/airflow/airflow.cfg")
                .reads("/opt/airflow/dags"),
            BuildStep::set_identity(SET_IDENTITY, "airflow"),
        ])
        .unwrap_err();
        assert!(matches!(err, KeelError::InputNotProduced { .. }));
    }

    #[test]
    fn test_identity_must_be_last() {
        let err = BuildPlan::new(vec![
            base(),
            BuildStep::set_identity(SET_IDENTITY, "airflow"),
            BuildStep::materialize_file(MATERIALIZE_MANIFEST, "requirements.txt", "/requirements.txt"),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Plan);

        let err = BuildPlan::new(vec![base()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Plan);
    }

    #[test]
    fn test_base_must_come_first_and_once() {
        assert!(BuildPlan::new(vec![]).is_err());
        assert!(BuildPlan::new(vec![BuildStep::set_identity(SET_IDENTITY, "airflow")]).is_err());

        let second = BuildStep::new("select-again", base().kind().clone());
        assert!(BuildPlan::new(vec![
            base(),
            second,
            BuildStep::set_identity(SET_IDENTITY, "airflow")
        ])
        .is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = BuildPlan::new(vec![
            base(),
            BuildStep::materialize_file("copy", "a", "/a"),
            BuildStep::materialize_file("copy", "b", "/b"),
            BuildStep::set_identity(SET_IDENTITY, "airflow"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_directory_output_covers_nested_inputs() {
        let plan = BuildPlan::new(vec![
            base(),
            BuildStep::materialize_directory("copy-dags", "dags", "/opt/airflow/dags", None),
            BuildStep::execute("check", vec!["python".into()]).reads("/opt/airflow/dags/etl.py"),
            BuildStep::set_identity(SET_IDENTITY, "airflow"),
        ]);
        assert!(plan.is_ok());
    }

    #[test]
    fn test_labels_record_provenance() {
        let plan = BuildPlan::compose(&params(InstallFlag::Enabled, None), &ImagePolicy::default())
            .unwrap();
        let base = plan
            .labels()
            .iter()
            .find(|l| l.key == "org.opencontainers.image.base.name")
            .unwrap();
        assert_eq!(base.value, "apache/airflow:2.8.1-python3.10");
        assert!(plan
            .labels()
            .iter()
            .any(|l| l.key == "io.keel.install-flag" && l.value == "true"));
    }
}
