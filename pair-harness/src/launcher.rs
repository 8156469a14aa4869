//! Process launcher
//!
//! Starts role executables and hands back a [`RoleProcess`] handle that can be
//! waited on, polled, or killed. The child's stderr is captured into a pipe
//! and forwarded verbatim to ours; the harness never looks at it.

use std::fmt;
use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};

/// How often a bounded wait polls the child.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long a reaped child's stderr may keep draining before we stop waiting.
const FORWARD_DRAIN: Duration = Duration::from_secs(2);

/// How a role process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitOutcome {
    /// Exited on its own with a status code
    Exited(i32),
    /// Killed by a signal (Unix only)
    Signaled(i32),
}

impl ExitOutcome {
    /// Result code for this outcome, using the shell's `128 + signal`
    /// convention for signal deaths.
    pub fn code(&self) -> i32 {
        match self {
            ExitOutcome::Exited(code) => *code,
            ExitOutcome::Signaled(signal) => 128 + signal,
        }
    }

    pub fn success(&self) -> bool {
        self.code() == 0
    }

    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitOutcome::Exited(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitOutcome::Signaled(signal);
            }
        }

        ExitOutcome::Exited(1)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exit {}", code),
            ExitOutcome::Signaled(signal) => write!(f, "signal {}", signal),
        }
    }
}

/// What to do with a child's stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StderrMode {
    /// Copy it to the harness's own stderr
    #[default]
    Forward,
    /// Drop it
    Discard,
}

impl FromStr for StderrMode {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(StderrMode::Forward),
            "discard" => Ok(StderrMode::Discard),
            other => Err(HarnessError::InvalidConfiguration(format!(
                "invalid stderr mode '{}'. Valid values: forward, discard",
                other
            ))),
        }
    }
}

/// A fully resolved command line for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCommand {
    /// Role label used in logs and failures
    pub role: String,
    pub executable: String,
    pub args: Vec<String>,
}

impl RoleCommand {
    pub fn new(role: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            executable: executable.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for RoleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.executable)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Handle to a launched role.
///
/// Once an outcome has been observed the handle is terminal: `wait` and
/// `try_wait` keep returning it and `terminate` does nothing.
pub trait RoleProcess {
    /// OS process id
    fn id(&self) -> u32;

    fn role(&self) -> &str;

    /// Poll without blocking.
    fn try_wait(&mut self) -> Result<Option<ExitOutcome>>;

    /// Block until the process exits.
    fn wait(&mut self) -> Result<ExitOutcome>;

    /// Send an immediate kill. Does not reap.
    fn terminate(&mut self) -> Result<()>;
}

/// Something that can start role processes.
pub trait Launcher {
    fn launch(&self, command: &RoleCommand) -> Result<Box<dyn RoleProcess>>;
}

/// Launches real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher {
    stderr: StderrMode,
}

impl SystemLauncher {
    pub fn new(stderr: StderrMode) -> Self {
        Self { stderr }
    }
}

impl Launcher for SystemLauncher {
    fn launch(&self, command: &RoleCommand) -> Result<Box<dyn RoleProcess>> {
        let stderr = match self.stderr {
            StderrMode::Forward => Stdio::piped(),
            StderrMode::Discard => Stdio::null(),
        };

        let mut child = Command::new(&command.executable)
            .args(&command.args)
            .stdin(Stdio::null())
            .stderr(stderr)
            .spawn()
            .map_err(|source| HarnessError::LaunchFailure {
                role: command.role.clone(),
                executable: command.executable.clone(),
                source,
            })?;

        let forwarder = child.stderr.take().map(Forwarder::spawn);

        debug!(role = %command.role, pid = child.id(), command = %command, "launched");

        Ok(Box::new(ChildProcess {
            role: command.role.clone(),
            child,
            outcome: None,
            forwarder,
        }))
    }
}

/// Copies one child's stderr into ours on a helper thread.
#[derive(Debug)]
struct Forwarder {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl Forwarder {
    fn spawn<R: io::Read + Send + 'static>(mut pipe: R) -> Self {
        let (tx, done) = mpsc::channel();
        let handle = thread::spawn(move || {
            let _ = io::copy(&mut pipe, &mut io::stderr().lock());
            let _ = tx.send(());
        });
        Self { handle, done }
    }

    /// Wait for the copy to reach end of file, up to `limit`.
    ///
    /// A grandchild that inherited the pipe can keep it open after the child
    /// is gone. In that case the thread is left behind and keeps copying.
    fn drain(self, role: &str, limit: Duration) {
        match self.done.recv_timeout(limit) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = self.handle.join();
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(role = %role, ?limit, "stderr still open after exit, not waiting for it");
            }
        }
    }
}

/// A role running as a real child process.
#[derive(Debug)]
pub struct ChildProcess {
    role: String,
    child: Child,
    outcome: Option<ExitOutcome>,
    forwarder: Option<Forwarder>,
}

impl ChildProcess {
    fn record(&mut self, status: ExitStatus) -> ExitOutcome {
        let outcome = ExitOutcome::from_status(status);
        debug!(role = %self.role, pid = self.child.id(), %outcome, "exited");
        self.outcome = Some(outcome);
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.drain(&self.role, FORWARD_DRAIN);
        }
        outcome
    }
}

impl RoleProcess for ChildProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn role(&self) -> &str {
        &self.role
    }

    fn try_wait(&mut self) -> Result<Option<ExitOutcome>> {
        if let Some(outcome) = self.outcome {
            return Ok(Some(outcome));
        }
        match self.child.try_wait()? {
            Some(status) => Ok(Some(self.record(status))),
            None => Ok(None),
        }
    }

    fn wait(&mut self) -> Result<ExitOutcome> {
        if let Some(outcome) = self.outcome {
            return Ok(outcome);
        }
        let status = self.child.wait()?;
        Ok(self.record(status))
    }

    fn terminate(&mut self) -> Result<()> {
        if self.outcome.is_some() {
            return Ok(());
        }
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Older std reports an already-exited child this way
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.drain(&self.role, FORWARD_DRAIN);
        }
    }
}

/// Wait for `process`, giving up after `timeout`.
///
/// With no timeout this blocks for as long as the process runs. When the limit
/// passes, the process is killed and reaped and a `Timeout` error is returned.
pub fn wait_with_timeout(
    process: &mut dyn RoleProcess,
    timeout: Option<Duration>,
) -> Result<ExitOutcome> {
    let Some(limit) = timeout else {
        return process.wait();
    };

    let start = Instant::now();
    loop {
        if let Some(outcome) = process.try_wait()? {
            return Ok(outcome);
        }

        if start.elapsed() >= limit {
            warn!(role = %process.role(), pid = process.id(), ?limit, "wait timed out, killing");
            process.terminate()?;
            process.wait()?;
            return Err(HarnessError::Timeout {
                role: process.role().to_string(),
                after: limit,
            });
        }

        thread::sleep(POLL_INTERVAL);
    }
}
