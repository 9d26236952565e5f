use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    schemars, tool, ServerHandler,
};
use serde::{Deserialize, Serialize};

use crate::executor::ExecutionResult;
use crate::service::ApplicationService;

/// Request parameters for get_application_help
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct HelpRequest {
    /// Name of the application
    pub name: String,
}

/// Request parameters for execute_application
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExecuteRequest {
    /// Name of the application
    pub name: String,
    /// Command-line arguments appended after the application's configured arguments
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Clone)]
pub struct AppRunnerServer {
    service: ApplicationService,
    tool_router: ToolRouter<Self>,
}

impl AppRunnerServer {
    pub fn new(service: ApplicationService) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("Error: failed to serialize result: {}", e))
}

/// Run a blocking execution off the async runtime. One child process per call.
async fn run_blocking(job: impl FnOnce() -> ExecutionResult + Send + 'static) -> String {
    let result = tokio::task::spawn_blocking(job)
        .await
        .unwrap_or_else(|e| ExecutionResult::failure(format!("Error executing application: {}", e)));
    to_json(&result)
}

const SERVER_INSTRUCTIONS: &str = r#"An MCP server that exposes configured command-line applications.

Tools:
- list_applications: names, availability and descriptions of every application
- get_deployment_mode: local, docker or remote
- get_application_help: run an application with --help
- execute_application: run an application with arguments

Execution results are JSON objects with stdout, stderr, exit_code and success.
An exit_code of 124 means the application hit its timeout and was killed."#;

#[rmcp::tool_router]
impl AppRunnerServer {
    #[tool(description = "List all configured applications and their status.")]
    fn list_applications(&self) -> String {
        let listed = self.service.list_applications();
        serde_json::to_string_pretty(&listed)
            .unwrap_or_else(|_| r#"{"applications": []}"#.to_string())
    }

    #[tool(description = "Get the current deployment mode (local, docker or remote).")]
    fn get_deployment_mode(&self) -> String {
        self.service.deployment_mode()
    }

    #[tool(description = "Get the command-line help for an application by running it with the --help flag.")]
    async fn get_application_help(&self, Parameters(req): Parameters<HelpRequest>) -> String {
        let service = self.service.clone();
        run_blocking(move || service.application_help(&req.name)).await
    }

    #[tool(description = "Execute an application with the provided arguments. Returns stdout, stderr, exit_code and success.

Example: {\"name\": \"hello_app\", \"args\": [\"-n\", \"Ben\", \"-r\", \"2\"]}")]
    async fn execute_application(&self, Parameters(req): Parameters<ExecuteRequest>) -> String {
        let service = self.service.clone();
        run_blocking(move || service.execute_application(&req.name, &req.args)).await
    }
}

#[rmcp::tool_handler]
impl ServerHandler for AppRunnerServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeploymentMode, WrapperConfig};
    use crate::registry::Registry;
    use std::collections::BTreeMap;

    fn empty_server() -> AppRunnerServer {
        let config = WrapperConfig {
            applications: BTreeMap::new(),
            deployment_mode: DeploymentMode::Local,
            docker_config: None,
            remote_config: None,
        };
        let registry = Registry::new(config, &std::env::temp_dir()).unwrap();
        AppRunnerServer::new(ApplicationService::new(registry))
    }

    #[test]
    fn test_deserialize_execute_request_without_args() {
        let req: ExecuteRequest = serde_json::from_str(r#"{"name": "hello_app"}"#).unwrap();
        assert_eq!(req.name, "hello_app");
        assert!(req.args.is_empty());
    }

    #[test]
    fn test_list_applications_json() {
        let server = empty_server();
        let json: serde_json::Value = serde_json::from_str(&server.list_applications()).unwrap();
        assert_eq!(json, serde_json::json!({"applications": []}));
    }

    #[test]
    fn test_get_deployment_mode() {
        assert_eq!(empty_server().get_deployment_mode(), "local");
    }

    #[tokio::test]
    async fn test_execute_unknown_application_json() {
        let server = empty_server();
        let req = ExecuteRequest {
            name: "missing_app".to_string(),
            args: vec![],
        };
        let json: serde_json::Value =
            serde_json::from_str(&server.execute_application(Parameters(req)).await).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "stdout": "",
                "stderr": "Application missing_app not found",
                "exit_code": 1,
                "success": false
            })
        );
    }
}
