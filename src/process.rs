use std::io;
use std::time::Duration;

use tracing::{info, warn};

use crate::executor::{build_command, CapturedChild, CapturedOutput, Termination};
use crate::resolver::Invocation;

/// Grace window between the terminate request and the hard kill.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// A long-lived application process started in the background.
///
/// Unlike a deadline-bound execution, stopping asks the process to terminate
/// first and only kills it when the grace window runs out.
pub struct ManagedProcess {
    name: String,
    child: CapturedChild,
}

impl ManagedProcess {
    pub fn start(name: impl Into<String>, invocation: &Invocation) -> io::Result<Self> {
        let name = name.into();
        info!(
            "Starting application {} with command: {}",
            name,
            invocation.command_line()
        );
        let child = CapturedChild::spawn(build_command(invocation))?;
        Ok(Self { name, child })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stop the process and return everything it wrote.
    pub fn stop(self) -> CapturedOutput {
        self.stop_with_grace(STOP_GRACE)
    }

    pub fn stop_with_grace(mut self, grace: Duration) -> CapturedOutput {
        info!("Stopping application {}", self.name);
        if self.is_running() {
            self.child.signal(Termination::Graceful);
            match self.child.wait_timeout(grace) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(
                        "Application {} did not terminate gracefully, killing it",
                        self.name
                    );
                    self.child.kill();
                }
                Err(e) => {
                    warn!("Error stopping application {}: {}", self.name, e);
                    self.child.kill();
                }
            }
        } else {
            warn!("Application {} is not running", self.name);
        }
        self.child.collect_output()
    }
}
