//! Pair coordinator
//!
//! Runs one [`TestPair`]: starts the first role, waits at the readiness gate,
//! starts the second role, then applies the pair's [`TerminationPolicy`] and
//! reduces both exit statuses into a single result code.
//!
//! A run moves through [`PairPhase`]s:
//!
//! ```text
//! Idle -> FirstStarting -> FirstRunning -> SecondStarting -> SecondRunning
//!      -> BothExited | FirstExitedSecondKilled -> Terminal
//! ```
//!
//! Launch, readiness and timeout failures jump straight to `Terminal`. No
//! step is ever retried.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};
use crate::failure::CategorizedFailure;
use crate::launcher::{wait_with_timeout, ExitOutcome, Launcher, RoleCommand, RoleProcess};
use crate::readiness::{self, await_ready, ReadinessProbe};

/// Result code for a role that could not be started.
pub const LAUNCH_FAILURE_CODE: i32 = 127;

/// Result code for a role killed after exceeding the wait timeout.
pub const TIMEOUT_CODE: i32 = 124;

/// How completion of a pair is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationPolicy {
    /// Wait for both roles. The first role's failure wins, otherwise the
    /// second role's status decides.
    WaitBoth,
    /// Wait for the first role to finish, then kill the second and report
    /// its status.
    WaitOneThenKill,
}

impl fmt::Display for TerminationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationPolicy::WaitBoth => write!(f, "wait-both"),
            TerminationPolicy::WaitOneThenKill => write!(f, "wait-one-then-kill"),
        }
    }
}

/// One participant of a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRole {
    pub label: String,
    pub executable: String,
    pub filter: Option<String>,
}

impl TestRole {
    pub fn new(label: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            executable: executable.into(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn command(&self) -> RoleCommand {
        let command = RoleCommand::new(self.label.clone(), self.executable.clone());
        match &self.filter {
            Some(filter) => command.arg(filter.clone()),
            None => command,
        }
    }
}

/// Two roles run as one scenario. `first` always starts, and settles, before
/// `second`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPair {
    pub name: String,
    pub first: TestRole,
    pub second: TestRole,
    pub policy: TerminationPolicy,
}

/// Where a pair run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairPhase {
    Idle,
    FirstStarting,
    FirstRunning,
    SecondStarting,
    SecondRunning,
    BothExited,
    FirstExitedSecondKilled,
    Terminal,
}

/// Knobs shared by every pair in a run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PairSettings {
    /// Gate between starting the first and the second role
    pub readiness: ReadinessProbe,
    /// Limit on each wait; `None` waits forever
    pub wait_timeout: Option<Duration>,
    /// Time the second role gets to exit on its own before being killed
    pub kill_grace: Duration,
}

/// Everything known about a finished pair.
#[derive(Debug, Clone, Serialize)]
pub struct PairOutcome {
    pub name: String,
    pub policy: TerminationPolicy,
    /// The pair's result: 0 on success
    pub code: i32,
    pub first: Option<ExitOutcome>,
    pub second: Option<ExitOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<CategorizedFailure>,
    pub phases: Vec<PairPhase>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl PairOutcome {
    pub fn passed(&self) -> bool {
        self.code == 0
    }
}

type Verdict = (i32, Option<CategorizedFailure>);

/// Observations collected while a pair runs.
struct PairRun<'p> {
    pair: &'p TestPair,
    phases: Vec<PairPhase>,
    first: Option<ExitOutcome>,
    second: Option<ExitOutcome>,
}

impl<'p> PairRun<'p> {
    fn new(pair: &'p TestPair) -> Self {
        Self {
            pair,
            phases: vec![PairPhase::Idle],
            first: None,
            second: None,
        }
    }

    fn enter(&mut self, phase: PairPhase) {
        debug!(pair = %self.pair.name, ?phase, "pair phase");
        self.phases.push(phase);
    }
}

/// Drives pairs through a [`Launcher`].
pub struct PairCoordinator<L: Launcher> {
    launcher: L,
    settings: PairSettings,
}

impl<L: Launcher> PairCoordinator<L> {
    pub fn new(launcher: L, settings: PairSettings) -> Self {
        Self { launcher, settings }
    }

    pub fn settings(&self) -> &PairSettings {
        &self.settings
    }

    /// Run one pair to completion. Every process started here has been reaped
    /// by the time this returns.
    pub fn run_pair(&self, pair: &TestPair) -> PairOutcome {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(pair = %pair.name, policy = %pair.policy, "starting pair");

        let mut run = PairRun::new(pair);
        let (code, failure) = match self.drive(&mut run) {
            Ok(verdict) => verdict,
            Err(e) => (failure_code(&e), Some(CategorizedFailure::from_error(&e))),
        };
        run.enter(PairPhase::Terminal);

        match &failure {
            None => info!(pair = %pair.name, "pair passed"),
            Some(f) => warn!(pair = %pair.name, code, failure = %f, "pair failed"),
        }

        PairOutcome {
            name: pair.name.clone(),
            policy: pair.policy,
            code,
            first: run.first,
            second: run.second,
            failure,
            phases: run.phases,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
        }
    }

    fn drive(&self, run: &mut PairRun<'_>) -> Result<Verdict> {
        let pair = run.pair;

        readiness::reset(&self.settings.readiness)?;
        run.enter(PairPhase::FirstStarting);
        let mut first = self.launcher.launch(&pair.first.command())?;
        run.enter(PairPhase::FirstRunning);

        if let Err(e) = await_ready(&self.settings.readiness, first.as_mut()) {
            run.first = release(first.as_mut());
            return Err(e);
        }

        run.enter(PairPhase::SecondStarting);
        let mut second = match self.launcher.launch(&pair.second.command()) {
            Ok(process) => process,
            Err(e) => {
                run.first = release(first.as_mut());
                return Err(e);
            }
        };
        run.enter(PairPhase::SecondRunning);

        match pair.policy {
            TerminationPolicy::WaitBoth => self.wait_both(run, first.as_mut(), second.as_mut()),
            TerminationPolicy::WaitOneThenKill => {
                self.wait_then_kill(run, first.as_mut(), second.as_mut())
            }
        }
    }

    fn wait_both(
        &self,
        run: &mut PairRun<'_>,
        first: &mut dyn RoleProcess,
        second: &mut dyn RoleProcess,
    ) -> Result<Verdict> {
        let timeout = self.settings.wait_timeout;

        let second_outcome = match wait_with_timeout(second, timeout) {
            Ok(outcome) => outcome,
            Err(e) => {
                run.second = observed(second);
                run.first = release(first);
                return Err(e);
            }
        };
        run.second = Some(second_outcome);

        let first_outcome = match wait_with_timeout(first, timeout) {
            Ok(outcome) => outcome,
            Err(e) => {
                run.first = observed(first);
                return Err(e);
            }
        };
        run.first = Some(first_outcome);
        run.enter(PairPhase::BothExited);

        let pair = run.pair;
        if !first_outcome.success() {
            return Ok(failed(&pair.first, first_outcome));
        }
        if !second_outcome.success() {
            return Ok(failed(&pair.second, second_outcome));
        }
        Ok((0, None))
    }

    fn wait_then_kill(
        &self,
        run: &mut PairRun<'_>,
        first: &mut dyn RoleProcess,
        second: &mut dyn RoleProcess,
    ) -> Result<Verdict> {
        let pair = run.pair;

        let first_outcome = match wait_with_timeout(first, self.settings.wait_timeout) {
            Ok(outcome) => outcome,
            Err(e) => {
                run.first = observed(first);
                run.second = release(second);
                return Err(e);
            }
        };
        run.first = Some(first_outcome);
        if !first_outcome.success() {
            warn!(
                pair = %pair.name,
                role = %pair.first.label,
                outcome = %first_outcome,
                "first role failed; result follows the second role"
            );
        }

        let second_outcome = match stop(second, self.settings.kill_grace) {
            Ok(outcome) => outcome,
            Err(e) => {
                run.second = observed(second);
                return Err(e);
            }
        };
        run.second = Some(second_outcome);
        run.enter(PairPhase::FirstExitedSecondKilled);
        debug!(pair = %pair.name, role = %pair.second.label, outcome = %second_outcome, "terminated");

        if second_outcome.success() {
            Ok((0, None))
        } else {
            Ok(failed(&pair.second, second_outcome))
        }
    }
}

fn failed(role: &TestRole, outcome: ExitOutcome) -> Verdict {
    let error = HarnessError::UnexpectedExit {
        role: role.label.clone(),
        code: outcome.code(),
    };
    let code = failure_code(&error);
    let failure = CategorizedFailure::from_error(&error);
    let failure = match outcome {
        ExitOutcome::Signaled(signal) => failure.with_details(format!("killed by signal {}", signal)),
        ExitOutcome::Exited(_) => failure,
    };
    (code, Some(failure))
}

fn failure_code(error: &HarnessError) -> i32 {
    match error {
        HarnessError::LaunchFailure { .. } => LAUNCH_FAILURE_CODE,
        HarnessError::Timeout { .. } => TIMEOUT_CODE,
        HarnessError::UnexpectedExit { code, .. } if *code != 0 => *code,
        _ => 1,
    }
}

/// Whatever outcome the process has already reported.
fn observed(process: &mut dyn RoleProcess) -> Option<ExitOutcome> {
    process.try_wait().ok().flatten()
}

/// Kill and reap a process that is no longer needed.
fn release(process: &mut dyn RoleProcess) -> Option<ExitOutcome> {
    if let Err(e) = process.terminate() {
        warn!(role = %process.role(), error = %e, "failed to terminate");
    }
    process.wait().ok()
}

/// Let `process` exit on its own within `grace`, then kill and reap it.
fn stop(process: &mut dyn RoleProcess, grace: Duration) -> Result<ExitOutcome> {
    if !grace.is_zero() {
        if let Some(outcome) = poll_for(process, grace)? {
            return Ok(outcome);
        }
    }
    process.terminate()?;
    process.wait()
}

/// Give a process up to `limit` to exit on its own.
fn poll_for(process: &mut dyn RoleProcess, limit: Duration) -> Result<Option<ExitOutcome>> {
    let start = Instant::now();
    loop {
        if let Some(outcome) = process.try_wait()? {
            return Ok(Some(outcome));
        }
        if start.elapsed() >= limit {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted launcher that records every call instead of spawning.

    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use super::*;

    /// How a scripted role behaves.
    #[derive(Debug, Clone, Copy)]
    pub enum Script {
        /// Exits with this code as soon as anyone looks
        Exits(i32),
        /// Keeps running until terminated
        RunsUntilKilled,
        /// The OS refuses to start it
        FailsToLaunch,
        /// Runs until terminated, then reaping it fails
        WaitFails,
    }

    pub type EventLog = Rc<RefCell<Vec<String>>>;

    pub struct ScriptedLauncher {
        scripts: HashMap<String, Script>,
        pub events: EventLog,
    }

    impl ScriptedLauncher {
        pub fn new(scripts: &[(&str, Script)]) -> Self {
            Self {
                scripts: scripts
                    .iter()
                    .map(|(role, script)| (role.to_string(), *script))
                    .collect(),
                events: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }

    impl Launcher for ScriptedLauncher {
        fn launch(&self, command: &RoleCommand) -> Result<Box<dyn RoleProcess>> {
            let script = self
                .scripts
                .get(&command.role)
                .copied()
                .unwrap_or(Script::Exits(0));
            if let Script::FailsToLaunch = script {
                self.events.borrow_mut().push(format!("launch-failed {}", command.role));
                return Err(HarnessError::LaunchFailure {
                    role: command.role.clone(),
                    executable: command.executable.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted"),
                });
            }
            self.events.borrow_mut().push(format!("launch {}", command));
            Ok(Box::new(ScriptedProcess {
                role: command.role.clone(),
                script,
                killed: false,
                events: Rc::clone(&self.events),
            }))
        }
    }

    struct ScriptedProcess {
        role: String,
        script: Script,
        killed: bool,
        events: EventLog,
    }

    impl ScriptedProcess {
        fn current(&self) -> Option<ExitOutcome> {
            match self.script {
                Script::Exits(code) => Some(ExitOutcome::Exited(code)),
                _ if self.killed => Some(ExitOutcome::Signaled(9)),
                _ => None,
            }
        }
    }

    impl RoleProcess for ScriptedProcess {
        fn id(&self) -> u32 {
            42
        }

        fn role(&self) -> &str {
            &self.role
        }

        fn try_wait(&mut self) -> Result<Option<ExitOutcome>> {
            Ok(self.current())
        }

        fn wait(&mut self) -> Result<ExitOutcome> {
            self.events.borrow_mut().push(format!("wait {}", self.role));
            if let Script::WaitFails = self.script {
                return Err(HarnessError::Io(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "scripted wait failure",
                )));
            }
            self.current().ok_or_else(|| {
                HarnessError::Io(std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "scripted role never exits",
                ))
            })
        }

        fn terminate(&mut self) -> Result<()> {
            self.events.borrow_mut().push(format!("terminate {}", self.role));
            self.killed = true;
            Ok(())
        }
    }
}
