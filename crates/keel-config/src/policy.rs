use crate::BuildParameters;
use keel_core::constants::{
    DEFAULT_BASE_REPOSITORY, DEFAULT_DISTRIBUTION_PACKAGE, DEFAULT_IMAGE_NAME,
    DEFAULT_MANIFEST_PATH, DEFAULT_MANIFEST_TARGET, DEFAULT_RESTRICTED_USER,
    DEFAULT_RUNTIME_LABEL,
};
use keel_core::{KeelError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where the dependency manifest comes from and where it lands in the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestSpec {
    /// Relative to the build context directory.
    pub path: PathBuf,
    pub target: String,
}

impl Default for ManifestSpec {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MANIFEST_PATH),
            target: DEFAULT_MANIFEST_TARGET.to_string(),
        }
    }
}

/// An application source directory that may be copied into the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTree {
    pub path: PathBuf,
    pub target: String,
    #[serde(default)]
    pub enabled: bool,
}

impl SourceTree {
    fn disabled(path: &str, target: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            target: target.to_string(),
            enabled: false,
        }
    }
}

/// Image policy loaded from `keel.yaml`. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagePolicy {
    pub base_repository: String,
    pub runtime_label: String,
    pub distribution_package: String,
    pub image_name: String,
    pub restricted_user: String,
    pub manifest: ManifestSpec,
    pub installer: Vec<String>,
    pub sources: Vec<SourceTree>,
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            base_repository: DEFAULT_BASE_REPOSITORY.to_string(),
            runtime_label: DEFAULT_RUNTIME_LABEL.to_string(),
            distribution_package: DEFAULT_DISTRIBUTION_PACKAGE.to_string(),
            image_name: DEFAULT_IMAGE_NAME.to_string(),
            restricted_user: DEFAULT_RESTRICTED_USER.to_string(),
            manifest: ManifestSpec::default(),
            installer: vec![
                "pip".to_string(),
                "install".to_string(),
                "--no-cache-dir".to_string(),
            ],
            sources: vec![
                SourceTree::disabled("dags", "/opt/airflow/dags"),
                SourceTree::disabled("scripts", "/opt/airflow/scripts"),
            ],
        }
    }
}

impl ImagePolicy {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let policy: ImagePolicy = serde_yaml::from_str(contents)
            .map_err(|e| KeelError::Config(format!("Error parsing the policy file: {e}")))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading image policy from {}", path.display());
        let contents = fs::read_to_string(path).map_err(|e| {
            KeelError::Config(format!("Unable to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&contents)
    }

    /// Loads `path` when it exists, otherwise falls back to the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No policy file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_repository.trim().is_empty() {
            return Err(KeelError::Config("base_repository must not be empty".into()));
        }
        match self.restricted_user.trim() {
            "" => return Err(KeelError::Config("restricted_user must not be empty".into())),
            "root" | "0" | "0:0" => {
                return Err(KeelError::Config(format!(
                    "restricted_user `{}` is a privileged account",
                    self.restricted_user
                )))
            }
            _ => {}
        }
        if self.installer.is_empty() {
            return Err(KeelError::Config("installer command must not be empty".into()));
        }
        if !self.manifest.target.starts_with('/') {
            return Err(KeelError::Config(format!(
                "manifest target `{}` must be an absolute path",
                self.manifest.target
            )));
        }
        for source in &self.sources {
            if !source.target.starts_with('/') {
                return Err(KeelError::Config(format!(
                    "source target `{}` must be an absolute path",
                    source.target
                )));
            }
        }
        Ok(())
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceTree> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Default tag for the final image: `<image-name>:<distribution-version>`.
    pub fn image_tag(&self, params: &BuildParameters) -> String {
        format!(
            "{}:{}",
            slug::slugify(&self.image_name),
            params.distribution_version()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InstallFlag;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_disable_source_trees() {
        let policy = ImagePolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.sources.len(), 2);
        assert_eq!(policy.enabled_sources().count(), 0);
        assert_eq!(policy.restricted_user, "airflow");
        assert_eq!(policy.manifest.target, "/requirements.txt");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let policy = ImagePolicy::from_yaml(
            r#"
image_name: Traffic Weather ETL
sources:
  - path: dags
    target: /opt/airflow/dags
    enabled: true
  - path: scripts
    target: /opt/airflow/scripts
"#,
        )
        .unwrap();

        assert_eq!(policy.base_repository, "apache/airflow");
        let enabled: Vec<_> = policy.enabled_sources().map(|s| s.path.clone()).collect();
        assert_eq!(enabled, vec![PathBuf::from("dags")]);

        let params = BuildParameters::new("2.8.1", "3.10", None, InstallFlag::Disabled).unwrap();
        assert_eq!(policy.image_tag(&params), "traffic-weather-etl:2.8.1");
    }

    #[test]
    fn test_privileged_identity_rejected() {
        let err = ImagePolicy::from_yaml("restricted_user: root\n").unwrap_err();
        assert!(err.to_string().contains("privileged"));
    }

    #[test]
    fn test_relative_targets_rejected() {
        assert!(ImagePolicy::from_yaml("manifest:\n  target: requirements.txt\n").is_err());
        assert!(ImagePolicy::from_yaml(
            "sources:\n  - path: dags\n    target: dags\n    enabled: true\n"
        )
        .is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "restricted_user: etl").unwrap();
        let policy = ImagePolicy::load(file.path()).unwrap();
        assert_eq!(policy.restricted_user, "etl");

        let missing = file.path().with_extension("absent");
        let policy = ImagePolicy::load_or_default(&missing).unwrap();
        assert_eq!(policy, ImagePolicy::default());
    }
}
