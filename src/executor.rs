use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::resolver::Invocation;

/// Exit code reported when the deadline forced termination
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code for failures that never produced a process exit status
pub const FAILURE_EXIT_CODE: i32 = 1;

/// How long to keep collecting output after the process group was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on a single sleep while polling for child exit.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

const READ_CHUNK: usize = 8 * 1024;

/// Outcome of one application invocation, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
}

impl ExecutionResult {
    pub fn new(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            success: exit_code == 0,
        }
    }

    /// A failure that happened before or instead of a process exit.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(String::new(), message.into(), FAILURE_EXIT_CODE)
    }
}

/// Captured stdout/stderr, possibly partial after a forced kill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Terminal states of a single execution.
#[derive(Debug)]
pub enum Outcome {
    Completed {
        status: ExitStatus,
        output: CapturedOutput,
    },
    TimedOut {
        output: CapturedOutput,
    },
    LaunchFailed(io::Error),
}

/// Overlay `overrides` on a copy of `base`. Override keys win.
pub fn merge_env<K, V>(
    base: impl IntoIterator<Item = (K, V)>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<OsString, OsString>
where
    K: Into<OsString>,
    V: Into<OsString>,
{
    let mut env: BTreeMap<OsString, OsString> = base
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    for (key, value) in overrides {
        env.insert(OsString::from(key), OsString::from(value));
    }
    env
}

/// Run an invocation to completion or until its deadline expires.
///
/// Never fails: launch errors and timeouts are folded into the result.
pub fn execute(invocation: &Invocation) -> ExecutionResult {
    info!("Executing command: {}", invocation.command_line());
    if !invocation.env_overrides.is_empty() {
        debug!("Added environment variables: {:?}", invocation.env_overrides);
    }

    let outcome = run(invocation);
    into_result(outcome, invocation.timeout)
}

/// Launch the invocation and wait for one of the terminal outcomes.
///
/// The deadline covers the child and anything it started that still holds
/// its output pipes. A timeout too large to represent means no deadline.
pub fn run(invocation: &Invocation) -> Outcome {
    let deadline = Instant::now().checked_add(invocation.timeout);
    let mut child = match CapturedChild::spawn(build_command(invocation)) {
        Ok(child) => child,
        Err(e) => return Outcome::LaunchFailed(e),
    };

    let status = match child.wait_until(deadline) {
        Ok(Some(status)) => status,
        Ok(None) => return time_out(&mut child),
        Err(e) => {
            child.kill();
            return Outcome::LaunchFailed(e);
        }
    };

    if !child.drain_until(deadline) {
        debug!("Output pipes still open at the deadline after the child exited");
        return time_out(&mut child);
    }
    // Nothing started by the child outlives the call.
    child.signal(Termination::Immediate);
    Outcome::Completed {
        status,
        output: child.take_output(),
    }
}

fn time_out(child: &mut CapturedChild) -> Outcome {
    child.kill();
    Outcome::TimedOut {
        output: child.collect_output(),
    }
}

fn into_result(outcome: Outcome, timeout: Duration) -> ExecutionResult {
    match outcome {
        Outcome::Completed { status, output } => {
            let exit_code = exit_code(status);
            debug!("Execution result: exit_code={}", exit_code);
            if exit_code != 0 {
                warn!("Application exited with non-zero code: {}", exit_code);
            }
            ExecutionResult::new(output.stdout, output.stderr, exit_code)
        }
        Outcome::TimedOut { output } => {
            let secs = format_secs(timeout);
            warn!("Application execution timed out after {} seconds", secs);
            ExecutionResult::new(
                output.stdout,
                format!(
                    "Application execution timed out after {} seconds\n{}",
                    secs, output.stderr
                ),
                TIMEOUT_EXIT_CODE,
            )
        }
        Outcome::LaunchFailed(e) => {
            error!("Error executing application: {}", e);
            ExecutionResult::failure(format!("Error executing application: {}", e))
        }
    }
}

/// Build the command with a fresh environment: inherited variables plus overrides.
pub fn build_command(invocation: &Invocation) -> Command {
    let env = merge_env(std::env::vars_os(), &invocation.env_overrides);
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .current_dir(&invocation.working_dir)
        .env_clear()
        .envs(&env);
    cmd
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    FAILURE_EXIT_CODE
}

fn format_secs(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        d.as_secs().to_string()
    } else {
        format!("{:.3}", d.as_secs_f64())
    }
}

/// How a process group is asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Graceful,
    Immediate,
}

/// A spawned child with both output streams drained on background threads.
///
/// The child runs in its own process group so termination reaches anything it
/// spawned. Dropping the handle kills and reaps a child that is still alive.
pub struct CapturedChild {
    child: Child,
    stdout: OutputStream,
    stderr: OutputStream,
}

impl CapturedChild {
    pub fn spawn(mut cmd: Command) -> io::Result<Self> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;
        let stdout = OutputStream::new(drain(child.stdout.take()));
        let stderr = OutputStream::new(drain(child.stderr.take()));
        Ok(Self {
            child,
            stdout,
            stderr,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Wait up to `timeout` for the child to exit. `Ok(None)` means it is still running.
    pub fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        self.wait_until(Instant::now().checked_add(timeout))
    }

    /// Wait for the child to exit, giving up at `deadline` (`None` waits forever).
    pub fn wait_until(&mut self, deadline: Option<Instant>) -> io::Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    POLL_INTERVAL.min(deadline - now)
                }
                None => POLL_INTERVAL,
            };
            thread::sleep(pause);
        }
    }

    /// Ask the whole process group to stop.
    pub fn signal(&self, how: Termination) {
        signal_process_group(self.child.id(), how);
    }

    /// Hard-kill the process group and reap the child.
    pub fn kill(&mut self) {
        self.signal(Termination::Immediate);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    /// Buffer output until both pipes close or `deadline` passes.
    /// Returns true once both pipes have closed.
    pub fn drain_until(&mut self, deadline: Option<Instant>) -> bool {
        let stdout_closed = self.stdout.drain_until(deadline);
        let stderr_closed = self.stderr.drain_until(deadline);
        stdout_closed && stderr_closed
    }

    /// Everything buffered so far.
    pub fn take_output(&mut self) -> CapturedOutput {
        CapturedOutput {
            stdout: self.stdout.take(),
            stderr: self.stderr.take(),
        }
    }

    /// Gather remaining output after the process group is gone. Bounded by a
    /// short grace period so a grandchild that left the group cannot stall the
    /// caller.
    pub fn collect_output(&mut self) -> CapturedOutput {
        self.drain_until(Some(Instant::now() + DRAIN_GRACE));
        self.take_output()
    }
}

struct OutputStream {
    rx: Receiver<Vec<u8>>,
    buf: Vec<u8>,
    closed: bool,
}

impl OutputStream {
    fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            buf: Vec::new(),
            closed: false,
        }
    }

    fn drain_until(&mut self, deadline: Option<Instant>) -> bool {
        while !self.closed {
            let received = match deadline {
                Some(deadline) => self
                    .rx
                    .recv_timeout(deadline.saturating_duration_since(Instant::now())),
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(chunk) => self.buf.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => self.closed = true,
            }
        }
        true
    }

    fn take(&mut self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.buf)).into_owned()
    }
}

impl Drop for CapturedChild {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            self.kill();
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match pipe.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });
    }
    rx
}

/// Signal a process group by its leader's pid
fn signal_process_group(pid: u32, how: Termination) {
    #[cfg(unix)]
    {
        let signal = match how {
            Termination::Graceful => libc::SIGTERM,
            Termination::Immediate => libc::SIGKILL,
        };
        // SAFETY: killpg has no memory-safety preconditions.
        unsafe {
            libc::killpg(pid as libc::pid_t, signal);
        }
    }
    #[cfg(windows)]
    {
        let mut cmd = Command::new("taskkill");
        if how == Termination::Immediate {
            cmd.arg("/F");
        }
        let _ = cmd.args(["/T", "/PID", &pid.to_string()]).output();
    }
}
