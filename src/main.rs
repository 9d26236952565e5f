use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rmcp::{transport::stdio, ServiceExt};
use tracing::{info, warn};

use app_runner_mcp_server::cli::{self, Command};
use app_runner_mcp_server::config::{ConfigFormat, WrapperConfig};
use app_runner_mcp_server::logging::init_logging;
use app_runner_mcp_server::registry::Registry;
use app_runner_mcp_server::server::AppRunnerServer;
use app_runner_mcp_server::service::ApplicationService;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse();
    init_logging(args.log_level)?;

    match args.command {
        Command::Run { config } => run(&config).await,
        Command::Validate { config } => validate(&config),
        Command::CreateConfig { output, format } => create_config(&output, format.into()),
    }
}

async fn run(config_path: &Path) -> Result<()> {
    info!("Loading configuration from {}", config_path.display());
    let registry = Registry::load(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    if registry.is_empty() {
        warn!("No applications configured; every call will report an unknown application");
    }
    info!("Configuration loaded with {} applications", registry.len());
    info!("Deployment mode: {}", registry.deployment_mode());

    let server = AppRunnerServer::new(ApplicationService::new(registry));
    info!("Starting MCP server with stdio transport");
    server.serve(stdio()).await?.waiting().await?;
    Ok(())
}

fn validate(config_path: &Path) -> Result<()> {
    let registry = Registry::load(config_path)
        .with_context(|| format!("validating config at {}", config_path.display()))?;

    println!("Deployment mode: {}", registry.deployment_mode());
    println!(
        "Configuration is valid with {} applications:",
        registry.len()
    );
    for (name, spec) in registry.iter() {
        println!(
            "  {}: {} | {}",
            name,
            spec.interpreter_kind,
            spec.working_directory.display()
        );
    }
    Ok(())
}

fn create_config(output: &Path, format: ConfigFormat) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let contents = WrapperConfig::sample().render(format)?;
    fs::write(output, contents).with_context(|| format!("writing {}", output.display()))?;
    println!("Sample configuration created at {}", output.display());
    Ok(())
}
