//! Turns an [`ApplicationSpec`] into a concrete program and argument vector.
//!
//! Each interpreter kind has a [`Launcher`] that decides what, if anything,
//! goes ahead of the application's command. Help and execute requests share
//! the same resolution path and differ only in their trailing arguments.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{ApplicationSpec, InterpreterKind};
use crate::error::ResolveError;

/// Conventional isolated-environment directory names, probed in this order.
const ISOLATED_ENV_DIRS: &[&str] = &["venv", ".venv", "env", ".env"];

/// Flag appended for help queries
pub const HELP_FLAG: &str = "--help";

/// A fully resolved command, ready to hand to the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
    /// Overrides layered on top of the inherited environment at launch.
    pub env_overrides: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl Invocation {
    /// Program followed by its arguments, lossily converted for display.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    pub fn command_line(&self) -> String {
        self.argv().join(" ")
    }
}

/// Produces the interpreter that precedes an application's command.
pub trait Launcher {
    /// `None` means the command is executed directly.
    fn interpreter(&self, spec: &ApplicationSpec) -> Option<PathBuf>;
}

pub struct PythonLauncher;
pub struct NodeLauncher;
pub struct CustomLauncher;

impl Launcher for PythonLauncher {
    fn interpreter(&self, spec: &ApplicationSpec) -> Option<PathBuf> {
        if let Some(path) = &spec.interpreter_path {
            return Some(path.clone());
        }
        if let Some(python) = isolated_env_interpreter(&spec.working_directory) {
            return Some(python);
        }
        Some(system_python().to_path_buf())
    }
}

impl Launcher for NodeLauncher {
    fn interpreter(&self, spec: &ApplicationSpec) -> Option<PathBuf> {
        Some(
            spec.interpreter_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("node")),
        )
    }
}

impl Launcher for CustomLauncher {
    fn interpreter(&self, _spec: &ApplicationSpec) -> Option<PathBuf> {
        None
    }
}

impl InterpreterKind {
    pub fn launcher(&self) -> &'static dyn Launcher {
        match self {
            InterpreterKind::Python => &PythonLauncher,
            InterpreterKind::Node => &NodeLauncher,
            InterpreterKind::Custom => &CustomLauncher,
        }
    }
}

/// Resolve a normal execution with caller-supplied arguments.
pub fn resolve_execute(
    spec: &ApplicationSpec,
    caller_args: &[String],
) -> Result<Invocation, ResolveError> {
    resolve(spec, caller_args.iter().map(OsString::from))
}

/// Resolve a help query: configured args followed by a single `--help`.
pub fn resolve_help(spec: &ApplicationSpec) -> Result<Invocation, ResolveError> {
    resolve(spec, std::iter::once(OsString::from(HELP_FLAG)))
}

fn resolve(
    spec: &ApplicationSpec,
    trailing: impl IntoIterator<Item = OsString>,
) -> Result<Invocation, ResolveError> {
    let working_dir = &spec.working_directory;
    if !working_dir.is_dir() {
        return Err(ResolveError::WorkingDirectoryNotFound(working_dir.clone()));
    }

    let command = anchor_command(&spec.command, working_dir);
    let interpreter = spec.interpreter_kind.launcher().interpreter(spec);

    let (program, mut args) = match interpreter {
        Some(interpreter) => (interpreter, vec![command.into_os_string()]),
        None => (command, Vec::new()),
    };
    args.extend(spec.args.iter().map(OsString::from));
    args.extend(trailing);

    Ok(Invocation {
        program,
        args,
        working_dir: working_dir.clone(),
        env_overrides: spec.env_vars.clone(),
        timeout: Duration::from_secs(spec.timeout_secs()),
    })
}

fn anchor_command(command: &str, working_dir: &Path) -> PathBuf {
    let path = Path::new(command);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    }
}

/// First conventional isolated-environment directory inside `working_dir`.
pub fn find_isolated_env(working_dir: &Path) -> Option<PathBuf> {
    ISOLATED_ENV_DIRS
        .iter()
        .map(|name| working_dir.join(name))
        .find(|candidate| candidate.is_dir())
}

fn isolated_env_interpreter(working_dir: &Path) -> Option<PathBuf> {
    let env_dir = find_isolated_env(working_dir)?;
    let python = env_python_path(&env_dir);
    if python.is_file() {
        info!("Using Python from virtual environment: {}", env_dir.display());
        Some(python)
    } else {
        warn!(
            "Python executable not found in virtual environment: {}",
            python.display()
        );
        None
    }
}

fn env_python_path(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts").join("python.exe")
    } else {
        env_dir.join("bin").join("python")
    }
}

/// Python interpreter found on PATH, looked up once per process.
pub fn system_python() -> &'static Path {
    static SYSTEM_PYTHON: OnceLock<PathBuf> = OnceLock::new();
    SYSTEM_PYTHON.get_or_init(|| {
        for name in ["python3", "python"] {
            if let Ok(path) = which::which(name) {
                debug!("System Python interpreter: {}", path.display());
                return path;
            }
        }
        warn!("No Python interpreter found on PATH, falling back to 'python3'");
        PathBuf::from("python3")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn spec(dir: &Path, kind: InterpreterKind, command: &str) -> ApplicationSpec {
        ApplicationSpec {
            name: None,
            description: None,
            working_directory: dir.to_path_buf(),
            interpreter_kind: kind,
            interpreter_path: None,
            command: command.to_string(),
            args: Vec::new(),
            env_vars: BTreeMap::new(),
            resource_limits: None,
            timeout_secs: None,
        }
    }

    fn os(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    fn make_venv(dir: &Path, name: &str, with_python: bool) -> PathBuf {
        let env_dir = dir.join(name);
        let python = env_python_path(&env_dir);
        fs::create_dir_all(python.parent().unwrap()).unwrap();
        if with_python {
            fs::write(&python, "").unwrap();
        }
        python
    }

    #[test]
    fn test_custom_runs_command_directly() {
        let dir = TempDir::new().unwrap();
        let mut spec = spec(dir.path(), InterpreterKind::Custom, "run.sh");
        spec.interpreter_path = Some(PathBuf::from("/bin/bash"));
        spec.args = vec!["--fast".to_string()];

        let inv = resolve_execute(&spec, &["x".to_string()]).unwrap();
        assert_eq!(inv.program, dir.path().join("run.sh"));
        assert_eq!(inv.args, os(&["--fast", "x"]));
    }

    #[test]
    fn test_node_defaults_to_path_lookup() {
        let dir = TempDir::new().unwrap();
        let spec = spec(dir.path(), InterpreterKind::Node, "server.js");
        let inv = resolve_execute(&spec, &[]).unwrap();
        assert_eq!(inv.program, PathBuf::from("node"));
        assert_eq!(inv.args, vec![dir.path().join("server.js").into_os_string()]);
    }

    #[test]
    fn test_interpreter_path_used_verbatim() {
        let dir = TempDir::new().unwrap();
        make_venv(dir.path(), "venv", true);
        let mut spec = spec(dir.path(), InterpreterKind::Python, "app.py");
        spec.interpreter_path = Some(PathBuf::from("/opt/python3.12/bin/python"));
        let inv = resolve_execute(&spec, &[]).unwrap();
        assert_eq!(inv.program, PathBuf::from("/opt/python3.12/bin/python"));
    }

    #[test]
    fn test_python_uses_system_interpreter_without_venv() {
        let dir = TempDir::new().unwrap();
        let spec = spec(dir.path(), InterpreterKind::Python, "app.py");
        let inv = resolve_execute(&spec, &[]).unwrap();
        assert_eq!(inv.program, system_python());
    }

    #[test]
    fn test_python_prefers_isolated_env() {
        let dir = TempDir::new().unwrap();
        let python = make_venv(dir.path(), ".venv", true);
        let spec = spec(dir.path(), InterpreterKind::Python, "app.py");
        let inv = resolve_execute(&spec, &[]).unwrap();
        assert_eq!(inv.program, python);
        assert_eq!(inv.args, vec![dir.path().join("app.py").into_os_string()]);
    }

    #[test]
    fn test_isolated_env_probe_order() {
        let dir = TempDir::new().unwrap();
        make_venv(dir.path(), "env", true);
        let venv_python = make_venv(dir.path(), "venv", true);
        assert_eq!(find_isolated_env(dir.path()), Some(dir.path().join("venv")));
        let spec = spec(dir.path(), InterpreterKind::Python, "app.py");
        assert_eq!(resolve_execute(&spec, &[]).unwrap().program, venv_python);
    }

    #[test]
    fn test_isolated_env_without_binary_falls_back() {
        let dir = TempDir::new().unwrap();
        make_venv(dir.path(), "venv", false);
        let spec = spec(dir.path(), InterpreterKind::Python, "app.py");
        let inv = resolve_execute(&spec, &[]).unwrap();
        assert_eq!(inv.program, system_python());
    }

    #[test]
    fn test_dotenv_file_is_not_an_isolated_env() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "SECRET=1\n").unwrap();
        assert_eq!(find_isolated_env(dir.path()), None);
    }

    #[test]
    fn test_node_ignores_isolated_env() {
        let dir = TempDir::new().unwrap();
        make_venv(dir.path(), "venv", true);
        let spec = spec(dir.path(), InterpreterKind::Node, "index.js");
        assert_eq!(resolve_execute(&spec, &[]).unwrap().program, PathBuf::from("node"));
    }

    #[test]
    fn test_caller_args_follow_spec_args() {
        let dir = TempDir::new().unwrap();
        let mut spec = spec(dir.path(), InterpreterKind::Node, "cli.js");
        spec.args = vec!["--config".to_string(), "prod.json".to_string()];
        let inv = resolve_execute(&spec, &["-v".to_string(), "run".to_string()]).unwrap();
        let mut expected = vec![dir.path().join("cli.js").into_os_string()];
        expected.extend(os(&["--config", "prod.json", "-v", "run"]));
        assert_eq!(inv.args, expected);
    }

    #[test]
    fn test_help_appends_single_flag_after_spec_args() {
        let dir = TempDir::new().unwrap();
        let mut spec = spec(dir.path(), InterpreterKind::Custom, "tool");
        spec.interpreter_path = Some(PathBuf::from("/bin/sh"));
        spec.args = vec!["sub".to_string()];
        let inv = resolve_help(&spec).unwrap();
        assert_eq!(inv.args, os(&["sub", "--help"]));
        assert_eq!(inv.args.iter().filter(|a| *a == HELP_FLAG).count(), 1);
    }

    #[test]
    fn test_absolute_command_is_kept() {
        let dir = TempDir::new().unwrap();
        let mut spec = spec(dir.path(), InterpreterKind::Custom, "/usr/bin/env");
        spec.interpreter_path = Some(PathBuf::from("/bin/sh"));
        assert_eq!(resolve_execute(&spec, &[]).unwrap().program, PathBuf::from("/usr/bin/env"));
    }

    #[test]
    fn test_missing_working_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        let spec = spec(&missing, InterpreterKind::Node, "a.js");
        assert_eq!(
            resolve_execute(&spec, &[]).unwrap_err(),
            ResolveError::WorkingDirectoryNotFound(missing)
        );
    }

    #[test]
    fn test_env_and_timeout_carried_over() {
        let dir = TempDir::new().unwrap();
        let mut spec = spec(dir.path(), InterpreterKind::Node, "a.js");
        spec.env_vars.insert("MODE".to_string(), "test".to_string());
        spec.timeout_secs = Some(5);
        let inv = resolve_help(&spec).unwrap();
        assert_eq!(inv.env_overrides.get("MODE").map(String::as_str), Some("test"));
        assert_eq!(inv.timeout, Duration::from_secs(5));
        assert_eq!(inv.working_dir, dir.path());
    }
}
