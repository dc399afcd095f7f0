/// Parameter keys recognised by the resolver.
pub const DISTRIBUTION_VERSION: &str = "distribution-version";
pub const RUNTIME_VERSION: &str = "runtime-version";
pub const FEATURE_EXTRAS: &str = "feature-extras";
pub const INSTALL_FLAG: &str = "install-flag";

pub const RECOGNISED_PARAMETERS: [&str; 4] = [
    DISTRIBUTION_VERSION,
    RUNTIME_VERSION,
    FEATURE_EXTRAS,
    INSTALL_FLAG,
];

/// The only value of `install-flag` that enables installation.
pub const TRUE_SENTINEL: &str = "true";
pub const FALSE_SENTINEL: &str = "false";

pub const DEFAULT_BASE_REPOSITORY: &str = "apache/airflow";
pub const DEFAULT_RUNTIME_LABEL: &str = "python";
pub const DEFAULT_DISTRIBUTION_PACKAGE: &str = "apache-airflow";
pub const DEFAULT_MANIFEST_PATH: &str = "requirements.txt";
pub const DEFAULT_MANIFEST_TARGET: &str = "/requirements.txt";
pub const DEFAULT_RESTRICTED_USER: &str = "airflow";
pub const DEFAULT_IMAGE_NAME: &str = "airflow-custom";
pub const DEFAULT_CONFIG_FILE: &str = "keel.yaml";
pub const DOCKERFILE_NAME: &str = "Dockerfile";
