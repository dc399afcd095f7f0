use keel_config::{BuildParameters, ImagePolicy};
use serde::Serialize;
use std::fmt;

/// Coordinate of the vendor image the build starts from.
///
/// Composed once from the distribution and runtime versions and never
/// modified afterwards. Version strings are not validated here; a bad value
/// only surfaces when the registry is asked for the image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BaseImageReference {
    repository: String,
    tag: String,
}

impl BaseImageReference {
    /// `<repository>:<distribution>-<runtime_label><runtime_version>`
    pub fn compose(
        repository: &str,
        distribution_version: &str,
        runtime_label: &str,
        runtime_version: &str,
    ) -> Self {
        Self {
            repository: repository.to_string(),
            tag: format!("{distribution_version}-{runtime_label}{runtime_version}"),
        }
    }

    pub fn select(params: &BuildParameters, policy: &ImagePolicy) -> Self {
        Self::compose(
            &policy.base_repository,
            params.distribution_version(),
            &policy.runtime_label,
            params.runtime_version(),
        )
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for BaseImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}
