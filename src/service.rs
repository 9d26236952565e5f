use serde::Serialize;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ApplicationSpec;
use crate::error::ResolveError;
use crate::executor::{self, ExecutionResult};
use crate::registry::Registry;
use crate::resolver::{self, Invocation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationStatus {
    pub name: String,
    pub available: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationsList {
    pub applications: Vec<ApplicationStatus>,
}

/// The operations exposed to remote callers, independent of any transport.
#[derive(Debug, Clone)]
pub struct ApplicationService {
    registry: Arc<Registry>,
}

impl ApplicationService {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Every configured application, sorted by name. An application is
    /// available when its working directory exists.
    pub fn list_applications(&self) -> ApplicationsList {
        info!("Listing applications");
        let applications = self
            .registry
            .iter()
            .map(|(name, spec)| ApplicationStatus {
                name: name.to_string(),
                available: spec.working_directory.is_dir(),
                description: spec.description.clone(),
            })
            .collect::<Vec<_>>();
        info!("Returning {} applications", applications.len());
        ApplicationsList { applications }
    }

    pub fn deployment_mode(&self) -> String {
        self.registry.deployment_mode().to_string()
    }

    /// Run the application with `--help` appended.
    pub fn application_help(&self, name: &str) -> ExecutionResult {
        info!("Getting help for application: {}", name);
        self.run(name, resolver::resolve_help)
    }

    /// Run the application with the caller's arguments appended.
    pub fn execute_application(&self, name: &str, args: &[String]) -> ExecutionResult {
        info!("Executing application: {} with args: {:?}", name, args);
        self.run(name, |spec| resolver::resolve_execute(spec, args))
    }

    fn run(
        &self,
        name: &str,
        resolve: impl FnOnce(&ApplicationSpec) -> Result<Invocation, ResolveError>,
    ) -> ExecutionResult {
        let invocation = self
            .registry
            .get(name)
            .ok_or_else(|| ResolveError::UnknownApplication(name.to_string()))
            .and_then(resolve);

        match invocation {
            Ok(invocation) => executor::execute(&invocation),
            Err(e) => {
                warn!("{}", e);
                ExecutionResult::failure(e.to_string())
            }
        }
    }
}
