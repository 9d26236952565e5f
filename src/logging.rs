//! Diagnostics go to stderr. Stdout belongs to the MCP stdio transport.

use anyhow::anyhow;
use tracing::Level;

use crate::cli::LogLevel;

/// Environment variable consulted when `--log-level` is absent.
pub const LOG_ENV_VAR: &str = "APP_RUNNER_LOG";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> anyhow::Result<()> {
    let env_level = std::env::var(LOG_ENV_VAR).ok();
    let level = resolve_level(cli_level, env_level.as_deref());

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_max_level(level)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {}", e))
}

/// The flag wins over the environment; anything unparseable falls back to info.
fn resolve_level(cli_level: Option<LogLevel>, env_level: Option<&str>) -> Level {
    cli_level
        .map(Level::from)
        .or_else(|| env_level.and_then(|s| s.trim().parse().ok()))
        .unwrap_or(Level::INFO)
}
