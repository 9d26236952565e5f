use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{ApplicationSpec, DeploymentMode, WrapperConfig};
use crate::error::ConfigError;

/// Validated, read-only set of applications keyed by name.
///
/// Built once at startup. Relative working directories are anchored at the
/// registry's base directory (the config file's directory) during
/// construction, so every application handed out carries an absolute path.
#[derive(Debug, Clone)]
pub struct Registry {
    applications: BTreeMap<String, ApplicationSpec>,
    deployment_mode: DeploymentMode,
}

impl Registry {
    /// Validate `config` and anchor relative paths at `base_dir`.
    /// Any invalid application rejects the whole registry.
    pub fn new(config: WrapperConfig, base_dir: &Path) -> Result<Self, ConfigError> {
        config.validate()?;

        let base_dir = std::path::absolute(base_dir).map_err(|source| ConfigError::BaseDirectory {
            path: base_dir.to_path_buf(),
            source,
        })?;

        let applications = config
            .applications
            .into_iter()
            .map(|(key, mut spec)| {
                if spec.working_directory.is_relative() {
                    spec.working_directory = base_dir.join(&spec.working_directory);
                }
                (key, spec)
            })
            .collect();

        Ok(Self {
            applications,
            deployment_mode: config.deployment_mode,
        })
    }

    /// Load a config file and build the registry relative to its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = WrapperConfig::load(path)?;
        let base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::new(config, &base_dir)
    }

    pub fn get(&self, name: &str) -> Option<&ApplicationSpec> {
        self.applications.get(name)
    }

    /// All applications, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ApplicationSpec)> {
        self.applications.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }

    pub fn deployment_mode(&self) -> DeploymentMode {
        self.deployment_mode
    }
}
