use std::path::PathBuf;

/// Fatal errors raised while loading the configuration file.
///
/// These are the only errors allowed to halt startup; everything that happens
/// per call is folded into an `ExecutionResult` instead.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config file must be YAML or JSON: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Invalid YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot resolve base directory {}: {source}", path.display())]
    BaseDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Per-call resolution failures. Recoverable: the service reports them as a
/// failed execution result.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("Application {0} not found")]
    UnknownApplication(String),

    #[error("Working directory not found: {}", .0.display())]
    WorkingDirectoryNotFound(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_application_message() {
        let err = ResolveError::UnknownApplication("missing_app".to_string());
        assert_eq!(err.to_string(), "Application missing_app not found");
    }

    #[test]
    fn test_working_directory_message() {
        let err = ResolveError::WorkingDirectoryNotFound(PathBuf::from("/nope"));
        assert_eq!(err.to_string(), "Working directory not found: /nope");
    }

    #[test]
    fn test_invalid_config_message() {
        let err = ConfigError::Invalid("docker deployment mode requires docker_config".into());
        assert!(err.to_string().contains("docker_config"));
    }
}
