use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Deadline applied when an application does not set its own `timeout`.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// How an application's command is wrapped before launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpreterKind {
    Python,
    Node,
    Custom,
}

impl fmt::Display for InterpreterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterpreterKind::Python => "python",
            InterpreterKind::Node => "node",
            InterpreterKind::Custom => "custom",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    #[default]
    Local,
    Docker,
    Remote,
}

impl DeploymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::Local => "local",
            DeploymentMode::Docker => "docker",
            DeploymentMode::Remote => "remote",
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of one external application, as written in the config file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApplicationSpec {
    /// Display name; the key in `applications` is what callers use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub working_directory: PathBuf,
    #[serde(rename = "interpreter_type")]
    pub interpreter_kind: InterpreterKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter_path: Option<PathBuf>,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_vars: BTreeMap<String, String>,
    /// Advisory CPU/memory limits. Only the container runtime reads these.
    #[serde(default, rename = "resources_limit", skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<BTreeMap<String, String>>,
    #[serde(default, rename = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ApplicationSpec {
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DockerConfig {
    #[serde(default = "default_base_image")]
    pub base_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// host path -> container path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_args: Option<Vec<String>>,
}

fn default_base_image() -> String {
    "python:3.11-slim".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    pub deploy_path: String,
}

fn default_ssh_port() -> u16 {
    22
}

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WrapperConfig {
    pub applications: BTreeMap<String, ApplicationSpec>,
    #[serde(default)]
    pub deployment_mode: DeploymentMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_config: Option<DockerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_config: Option<RemoteConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Some(ConfigFormat::Yaml),
            Some("json") => Some(ConfigFormat::Json),
            _ => None,
        }
    }
}

impl WrapperConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&contents, format).map_err(|e| match e {
            ParseError::Yaml(source) => ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            },
            ParseError::Json(source) => ConfigError::Json {
                path: path.to_path_buf(),
                source,
            },
        })?;
        config.validate()?;
        Ok(config)
    }

    fn parse(contents: &str, format: ConfigFormat) -> Result<Self, ParseError> {
        match format {
            ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(ParseError::Yaml),
            ConfigFormat::Json => serde_json::from_str(contents).map_err(ParseError::Json),
        }
    }

    /// Check the invariants serde cannot express. The first violation wins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, app) in &self.applications {
            if app.command.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "application '{}': command must not be empty",
                    key
                )));
            }
            let has_interpreter_path = app
                .interpreter_path
                .as_ref()
                .is_some_and(|p| !p.as_os_str().is_empty());
            if app.interpreter_kind == InterpreterKind::Custom && !has_interpreter_path {
                return Err(ConfigError::Invalid(format!(
                    "application '{}': custom interpreter type requires interpreter_path",
                    key
                )));
            }
            if app.timeout_secs == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "application '{}': timeout must be greater than zero",
                    key
                )));
            }
        }

        match self.deployment_mode {
            DeploymentMode::Docker if self.docker_config.is_none() => Err(ConfigError::Invalid(
                "docker deployment mode requires docker_config".to_string(),
            )),
            DeploymentMode::Remote if self.remote_config.is_none() => Err(ConfigError::Invalid(
                "remote deployment mode requires remote_config".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Render the config in the given format.
    pub fn render(&self, format: ConfigFormat) -> anyhow::Result<String> {
        Ok(match format {
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
        })
    }

    /// A two-application starter config written by `create-config`.
    pub fn sample() -> Self {
        let python_app = ApplicationSpec {
            name: Some("Sample Python App".to_string()),
            description: Some("A sample Python application".to_string()),
            working_directory: PathBuf::from("/path/to/python/app"),
            interpreter_kind: InterpreterKind::Python,
            interpreter_path: None,
            command: "app.py".to_string(),
            args: vec!["--arg1".to_string(), "value1".to_string()],
            env_vars: BTreeMap::from([
                ("ENV_VAR1".to_string(), "value1".to_string()),
                ("ENV_VAR2".to_string(), "value2".to_string()),
            ]),
            resource_limits: None,
            timeout_secs: Some(600),
        };
        let node_app = ApplicationSpec {
            name: Some("Sample Node App".to_string()),
            description: Some("A sample Node.js application".to_string()),
            working_directory: PathBuf::from("/path/to/node/app"),
            interpreter_kind: InterpreterKind::Node,
            interpreter_path: None,
            command: "server.js".to_string(),
            args: Vec::new(),
            env_vars: BTreeMap::from([("NODE_ENV".to_string(), "production".to_string())]),
            resource_limits: None,
            timeout_secs: Some(300),
        };

        WrapperConfig {
            applications: BTreeMap::from([
                ("sample_python_app".to_string(), python_app),
                ("sample_node_app".to_string(), node_app),
            ]),
            deployment_mode: DeploymentMode::Local,
            docker_config: Some(DockerConfig {
                base_image: default_base_image(),
                network: Some("bridge".to_string()),
                volumes: Some(BTreeMap::from([(
                    "/host/path".to_string(),
                    "/container/path".to_string(),
                )])),
                additional_args: None,
            }),
            remote_config: None,
        }
    }
}

enum ParseError {
    Yaml(serde_yaml::Error),
    Json(serde_json::Error),
}
