use keel_core::constants::{
    DISTRIBUTION_VERSION, FALSE_SENTINEL, FEATURE_EXTRAS, INSTALL_FLAG, RECOGNISED_PARAMETERS,
    RUNTIME_VERSION, TRUE_SENTINEL,
};
use keel_core::{KeelError, Result};
use log::{debug, trace, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Whether third-party packages are installed on top of the base image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallFlag {
    Enabled,
    #[default]
    Disabled,
}

impl InstallFlag {
    pub fn is_enabled(&self) -> bool {
        matches!(self, InstallFlag::Enabled)
    }

    /// Absent and empty values disable installation; anything that is not
    /// exactly `true` or `false` is rejected.
    pub fn resolve(value: Option<&str>) -> Result<Self> {
        match value {
            None => Ok(InstallFlag::Disabled),
            Some(v) if v.is_empty() => Ok(InstallFlag::Disabled),
            Some(v) => v.parse(),
        }
    }
}

impl FromStr for InstallFlag {
    type Err = KeelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            TRUE_SENTINEL => Ok(InstallFlag::Enabled),
            FALSE_SENTINEL => Ok(InstallFlag::Disabled),
            other => Err(KeelError::InvalidParameter {
                name: INSTALL_FLAG.to_string(),
                value: other.to_string(),
                reason: format!("expected exactly `{TRUE_SENTINEL}` or `{FALSE_SENTINEL}`"),
            }),
        }
    }
}

impl fmt::Display for InstallFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallFlag::Enabled => write!(f, "{TRUE_SENTINEL}"),
            InstallFlag::Disabled => write!(f, "{FALSE_SENTINEL}"),
        }
    }
}

/// Build parameters, resolved once per build invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildParameters {
    distribution_version: String,
    runtime_version: String,
    feature_extras: Option<String>,
    install_flag: InstallFlag,
}

impl BuildParameters {
    pub fn new(
        distribution_version: &str,
        runtime_version: &str,
        feature_extras: Option<&str>,
        install_flag: InstallFlag,
    ) -> Result<Self> {
        let mut raw = HashMap::new();
        raw.insert(DISTRIBUTION_VERSION.to_string(), distribution_version.to_string());
        raw.insert(RUNTIME_VERSION.to_string(), runtime_version.to_string());
        if let Some(extras) = feature_extras {
            raw.insert(FEATURE_EXTRAS.to_string(), extras.to_string());
        }
        raw.insert(INSTALL_FLAG.to_string(), install_flag.to_string());
        Self::resolve(&raw)
    }

    /// Resolves the recognised parameters from caller-supplied pairs.
    ///
    /// Values are taken verbatim. Unknown keys are ignored.
    pub fn resolve(raw: &HashMap<String, String>) -> Result<Self> {
        for key in raw.keys() {
            if !RECOGNISED_PARAMETERS.contains(&key.as_str()) {
                warn!("Ignoring unknown build parameter `{}`", key);
            }
        }

        let distribution_version = required(raw, DISTRIBUTION_VERSION)?;
        let runtime_version = required(raw, RUNTIME_VERSION)?;
        let feature_extras = raw
            .get(FEATURE_EXTRAS)
            .filter(|v| !v.is_empty())
            .cloned();
        let install_flag = InstallFlag::resolve(raw.get(INSTALL_FLAG).map(String::as_str))?;

        debug!(
            "Resolved parameters: distribution={} runtime={} extras={:?} install={}",
            distribution_version, runtime_version, feature_extras, install_flag
        );

        Ok(Self {
            distribution_version,
            runtime_version,
            feature_extras,
            install_flag,
        })
    }

    /// Resolves parameters from `KEY=VALUE` strings. Later pairs win.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut raw = HashMap::new();
        for pair in pairs {
            let (key, value) = parse_build_arg(pair.as_ref())?;
            trace!("Build argument {}={}", key, value);
            raw.insert(key, value);
        }
        Self::resolve(&raw)
    }

    pub fn distribution_version(&self) -> &str {
        &self.distribution_version
    }

    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    pub fn feature_extras(&self) -> Option<&str> {
        self.feature_extras.as_deref()
    }

    pub fn install_flag(&self) -> InstallFlag {
        self.install_flag
    }
}

fn required(raw: &HashMap<String, String>, key: &str) -> Result<String> {
    match raw.get(key) {
        Some(value) if !value.is_empty() => Ok(value.clone()),
        _ => Err(KeelError::MissingParameter(key.to_string())),
    }
}

/// Splits a `KEY=VALUE` build argument on the first `=`.
pub fn parse_build_arg(arg: &str) -> Result<(String, String)> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(KeelError::InvalidParameter {
            name: arg.to_string(),
            value: arg.to_string(),
            reason: "expected KEY=VALUE".to_string(),
        }),
    }
}
