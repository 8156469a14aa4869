//! Run command implementation
//!
//! Resolves the configured pairs, runs them in order, and reports each result.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{HarnessConfig, RunMode};
use crate::coordinator::PairCoordinator;
use crate::launcher::SystemLauncher;
use crate::readiness::ReadinessProbe;
use crate::suite::{run_suite, SuiteReport};

/// Command-line options that take precedence over the loaded configuration.
#[derive(Debug, Default)]
pub struct RunOverrides {
    /// Orchestration mode
    pub mode: Option<RunMode>,
    /// Settling delay in milliseconds (ignored when a readiness probe is set)
    pub settle_ms: Option<u64>,
    /// Per-wait timeout in seconds
    pub wait_timeout_secs: Option<u64>,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut HarnessConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(ms) = self.settle_ms {
            if matches!(config.pair.readiness, ReadinessProbe::Delay(_)) {
                config.pair.readiness = ReadinessProbe::Delay(Duration::from_millis(ms));
            }
        }
        if let Some(secs) = self.wait_timeout_secs {
            config.pair.wait_timeout = Some(Duration::from_secs(secs));
        }
    }
}

/// Run every pair of the configured mode.
///
/// Configuration problems are returned before anything is launched. Pair
/// failures are not errors: they are recorded in the returned report.
pub fn run(config: &HarnessConfig, cases: &[String]) -> Result<SuiteReport> {
    let pairs = config
        .pairs(cases)
        .with_context(|| format!("Cannot run {} mode", config.mode))?;
    info!(mode = %config.mode, pairs = pairs.len(), readiness = %config.pair.readiness, "resolved configuration");

    let coordinator = PairCoordinator::new(SystemLauncher::new(config.stderr), config.pair.clone());
    Ok(run_suite(&coordinator, &pairs))
}

/// Print the verdict lines for a finished run.
pub fn print_report(report: &SuiteReport) {
    for outcome in &report.outcomes {
        if outcome.passed() {
            println!("PASS: {}", outcome.name);
        } else {
            println!("FAIL: {}", outcome.name);
            if let Some(ref failure) = outcome.failure {
                println!("  Failures:");
                println!("    - {}", failure);
            }
        }
    }

    let total = report.outcomes.len();
    println!(
        "\n{}/{} pairs passed (exit {})",
        total - report.failed_count(),
        total,
        report.code
    );
}

/// Write the JSON report if one was requested.
pub fn save_report(report: &SuiteReport, path: Option<&PathBuf>) -> Result<()> {
    if let Some(path) = path {
        report.save(path)?;
        info!(path = %path.display(), "wrote report");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;

    fn config() -> HarnessConfig {
        HarnessConfig::from_layers(ConfigFile::default(), |_: &str| None).unwrap()
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = config();
        RunOverrides {
            mode: Some(RunMode::Suite),
            settle_ms: Some(10),
            wait_timeout_secs: Some(30),
        }
        .apply(&mut config);

        assert_eq!(config.mode, RunMode::Suite);
        assert_eq!(config.pair.readiness, ReadinessProbe::Delay(Duration::from_millis(10)));
        assert_eq!(config.pair.wait_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_settle_override_keeps_probe() {
        let mut config = config();
        let probe = ReadinessProbe::Tcp {
            addr: "127.0.0.1:2019".to_string(),
            timeout: Duration::from_secs(1),
        };
        config.pair.readiness = probe.clone();
        RunOverrides {
            settle_ms: Some(10),
            ..RunOverrides::default()
        }
        .apply(&mut config);
        assert_eq!(config.pair.readiness, probe);
    }

    #[test]
    fn test_missing_configuration_fails_before_launch() {
        let err = run(&config(), &[]).unwrap_err();
        let root = err.downcast_ref::<crate::HarnessError>().unwrap();
        assert!(root.is_configuration());
        assert!(format!("{:#}", err).contains("AGENT_EXEC"));
    }
}
