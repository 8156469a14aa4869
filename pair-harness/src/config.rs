//! Harness configuration
//!
//! Everything the harness needs from the outside world is resolved once, at
//! startup, into a [`HarnessConfig`]. Values come from the environment
//! (highest priority) or `~/.config/pair-harness/config.toml`. The environment
//! is passed in as a lookup function so tests never touch the real one.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::coordinator::{PairSettings, TerminationPolicy, TestPair, TestRole};
use crate::error::{HarnessError, Result};
use crate::launcher::StderrMode;
use crate::readiness::{ReadinessProbe, DEFAULT_READY_TIMEOUT, DEFAULT_SETTLE};
use crate::selector::{select_filter, Selector};

/// A configuration value's name in the TOML file and in the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    pub name: &'static str,
    pub env: &'static str,
}

impl Key {
    const fn new(name: &'static str, env: &'static str) -> Self {
        Self { name, env }
    }
}

pub const MODE: Key = Key::new("mode", "PAIR_HARNESS_MODE");
pub const AGENT_EXEC: Key = Key::new("agent_exec", "AGENT_EXEC");
pub const CLIENT_EXEC: Key = Key::new("client_exec", "CLIENT_EXEC");
pub const TEST_TYPE: Key = Key::new("test_type", "TEST_TYPE");
pub const SUITE_AGENT_EXEC: Key = Key::new("suite_agent_exec", "TEST_INTEGRATION_AGENT");
pub const SUITE_CLIENT_EXEC: Key = Key::new("suite_client_exec", "TEST_INTEGRATION_CLIENT");
pub const SENDER_EXEC: Key = Key::new("sender_exec", "BASIC_UDP_SENDER_BIN");
pub const RECEIVER_EXEC: Key = Key::new("receiver_exec", "BASIC_UDP_RECEIVER_BIN");
pub const FILTER_FLAG: Key = Key::new("filter_flag", "PAIR_HARNESS_FILTER_FLAG");
pub const AGENT_SUITE: Key = Key::new("agent_suite", "PAIR_HARNESS_AGENT_SUITE");
pub const CLIENT_SUITE: Key = Key::new("client_suite", "PAIR_HARNESS_CLIENT_SUITE");
pub const SETTLE_MS: Key = Key::new("settle_ms", "PAIR_HARNESS_SETTLE_MS");
pub const READY_TCP: Key = Key::new("ready_tcp", "PAIR_HARNESS_READY_TCP");
pub const READY_FILE: Key = Key::new("ready_file", "PAIR_HARNESS_READY_FILE");
pub const READY_TIMEOUT_SECS: Key = Key::new("ready_timeout_secs", "PAIR_HARNESS_READY_TIMEOUT_SECS");
pub const WAIT_TIMEOUT_SECS: Key = Key::new("wait_timeout_secs", "PAIR_HARNESS_WAIT_TIMEOUT_SECS");
pub const KILL_GRACE_MS: Key = Key::new("kill_grace_ms", "PAIR_HARNESS_KILL_GRACE_MS");
pub const STDERR: Key = Key::new("stderr", "PAIR_HARNESS_STDERR");

/// Which orchestration to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RunMode {
    /// One agent/client pair selected by TEST_TYPE
    #[default]
    Pair,
    /// The canonical agent/client integration suite
    Suite,
    /// A sender that runs to completion and a receiver that is then killed
    Relay,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Pair => write!(f, "pair"),
            RunMode::Suite => write!(f, "suite"),
            RunMode::Relay => write!(f, "relay"),
        }
    }
}

impl FromStr for RunMode {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pair" => Ok(RunMode::Pair),
            "suite" => Ok(RunMode::Suite),
            "relay" => Ok(RunMode::Relay),
            other => Err(HarnessError::InvalidConfiguration(format!(
                "invalid mode '{}'. Valid values: pair, suite, relay",
                other
            ))),
        }
    }
}

/// Raw TOML file structure for `~/.config/pair-harness/config.toml`.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub mode: Option<String>,
    pub agent_exec: Option<String>,
    pub client_exec: Option<String>,
    pub test_type: Option<String>,
    pub suite_agent_exec: Option<String>,
    pub suite_client_exec: Option<String>,
    pub sender_exec: Option<String>,
    pub receiver_exec: Option<String>,
    pub filter_flag: Option<String>,
    pub agent_suite: Option<String>,
    pub client_suite: Option<String>,
    pub settle_ms: Option<u64>,
    pub ready_tcp: Option<String>,
    pub ready_file: Option<PathBuf>,
    pub ready_timeout_secs: Option<u64>,
    pub wait_timeout_secs: Option<u64>,
    pub kill_grace_ms: Option<u64>,
    pub stderr: Option<String>,
}

impl ConfigFile {
    /// Read a config file. A missing file is the same as an empty one.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            HarnessError::InvalidConfiguration(format!(
                "failed to parse config {}: {}",
                path.display(),
                e
            ))
        })
    }
}

/// Default config file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pair-harness").join("config.toml"))
}

/// Fully resolved harness configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub mode: RunMode,
    pub agent_exec: Option<String>,
    pub client_exec: Option<String>,
    pub test_type: Option<String>,
    pub suite_agent_exec: Option<String>,
    pub suite_client_exec: Option<String>,
    pub sender_exec: Option<String>,
    pub receiver_exec: Option<String>,
    pub selector: Selector,
    pub pair: PairSettings,
    pub stderr: StderrMode,
}

impl HarnessConfig {
    /// Load configuration from the config file and an environment lookup.
    ///
    /// `config_path` overrides the default file location.
    pub fn load<F>(config_path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match config_path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(path) => ConfigFile::read(&path)?,
            None => ConfigFile::default(),
        };
        Self::from_layers(file, env)
    }

    /// Merge file values with the environment. Environment values win.
    pub fn from_layers<F>(file: ConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: Key, fallback: Option<String>| -> Option<String> {
            env(key.env)
                .filter(|value| !value.trim().is_empty())
                .or_else(|| fallback.filter(|value| !value.trim().is_empty()))
        };
        let number = |key: Key, fallback: Option<u64>| -> Result<Option<u64>> {
            match env(key.env).filter(|value| !value.trim().is_empty()) {
                Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
                    HarnessError::InvalidConfiguration(format!(
                        "{} must be a whole number, got '{}'",
                        key.env, raw
                    ))
                }),
                None => Ok(fallback),
            }
        };

        let mode = match lookup(MODE, file.mode) {
            Some(raw) => raw.parse()?,
            None => RunMode::default(),
        };

        let defaults = Selector::default();
        let selector = Selector {
            flag: lookup(FILTER_FLAG, file.filter_flag).unwrap_or(defaults.flag),
            agent_suite: lookup(AGENT_SUITE, file.agent_suite).unwrap_or(defaults.agent_suite),
            client_suite: lookup(CLIENT_SUITE, file.client_suite).unwrap_or(defaults.client_suite),
        };

        let ready_timeout = number(READY_TIMEOUT_SECS, file.ready_timeout_secs)?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_READY_TIMEOUT);
        let ready_file = env(READY_FILE.env)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .or(file.ready_file);
        let readiness = match (lookup(READY_TCP, file.ready_tcp), ready_file) {
            (Some(_), Some(_)) => {
                return Err(HarnessError::InvalidConfiguration(format!(
                    "only one of {} and {} may be set",
                    READY_TCP.name, READY_FILE.name
                )))
            }
            (Some(addr), None) => ReadinessProbe::Tcp {
                addr,
                timeout: ready_timeout,
            },
            (None, Some(path)) => ReadinessProbe::File {
                path,
                timeout: ready_timeout,
            },
            (None, None) => ReadinessProbe::Delay(
                number(SETTLE_MS, file.settle_ms)?
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_SETTLE),
            ),
        };

        let pair = PairSettings {
            readiness,
            wait_timeout: number(WAIT_TIMEOUT_SECS, file.wait_timeout_secs)?.map(Duration::from_secs),
            kill_grace: number(KILL_GRACE_MS, file.kill_grace_ms)?
                .map(Duration::from_millis)
                .unwrap_or(Duration::ZERO),
        };

        let stderr = match lookup(STDERR, file.stderr) {
            Some(raw) => raw.parse()?,
            None => StderrMode::default(),
        };

        Ok(Self {
            mode,
            agent_exec: lookup(AGENT_EXEC, file.agent_exec),
            client_exec: lookup(CLIENT_EXEC, file.client_exec),
            test_type: lookup(TEST_TYPE, file.test_type),
            suite_agent_exec: lookup(SUITE_AGENT_EXEC, file.suite_agent_exec),
            suite_client_exec: lookup(SUITE_CLIENT_EXEC, file.suite_client_exec),
            sender_exec: lookup(SENDER_EXEC, file.sender_exec),
            receiver_exec: lookup(RECEIVER_EXEC, file.receiver_exec),
            selector,
            pair,
            stderr,
        })
    }

    /// Build every pair the configured mode will run.
    ///
    /// All required values are checked here, so a missing one stops the run
    /// before anything is launched. `cases` overrides TEST_TYPE in pair mode
    /// and selects a subset of the suite in suite mode.
    pub fn pairs(&self, cases: &[String]) -> Result<Vec<TestPair>> {
        match self.mode {
            RunMode::Pair => {
                let agent = require(AGENT_EXEC, &self.agent_exec)?;
                let client = require(CLIENT_EXEC, &self.client_exec)?;
                let cases = if cases.is_empty() {
                    vec![require(TEST_TYPE, &self.test_type)?]
                } else {
                    let mut selected = Vec::with_capacity(cases.len());
                    for case in cases {
                        let case = case.trim();
                        // Blank counts as missing, as it does for TEST_TYPE
                        if case.is_empty() {
                            return Err(HarnessError::ConfigurationMissing {
                                key: TEST_TYPE.name,
                                env: TEST_TYPE.env,
                            });
                        }
                        selected.push(case.to_string());
                    }
                    selected
                };
                Ok(cases
                    .into_iter()
                    .map(|case| self.agent_client_pair(&agent, &client, case))
                    .collect())
            }
            RunMode::Suite => {
                let agent = require(SUITE_AGENT_EXEC, &self.suite_agent_exec)?;
                let client = require(SUITE_CLIENT_EXEC, &self.suite_client_exec)?;
                Ok(self
                    .selector
                    .select_cases(cases)?
                    .into_iter()
                    .map(|case| self.agent_client_pair(&agent, &client, case.case))
                    .collect())
            }
            RunMode::Relay => {
                if !cases.is_empty() {
                    return Err(HarnessError::InvalidConfiguration(
                        "relay mode does not take test cases".to_string(),
                    ));
                }
                let sender = require(SENDER_EXEC, &self.sender_exec)?;
                let receiver = require(RECEIVER_EXEC, &self.receiver_exec)?;
                Ok(vec![TestPair {
                    name: "relay".to_string(),
                    first: TestRole::new("sender", sender),
                    second: TestRole::new("receiver", receiver),
                    policy: TerminationPolicy::WaitOneThenKill,
                }])
            }
        }
    }

    fn agent_client_pair(&self, agent: &str, client: &str, case: String) -> TestPair {
        let selector = &self.selector;
        TestPair {
            first: TestRole::new("agent", agent)
                .with_filter(select_filter(&selector.flag, &selector.agent_suite, &case)),
            second: TestRole::new("client", client)
                .with_filter(select_filter(&selector.flag, &selector.client_suite, &case)),
            name: case,
            policy: TerminationPolicy::WaitBoth,
        }
    }
}

fn require(key: Key, value: &Option<String>) -> Result<String> {
    value.clone().ok_or(HarnessError::ConfigurationMissing {
        key: key.name,
        env: key.env,
    })
}
