//! pair-harness CLI
//!
//! Paired-process integration test orchestrator.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use pair_harness::commands;
use pair_harness::commands::run::RunOverrides;
use pair_harness::reducer::exit_code;
use pair_harness::{HarnessConfig, HarnessError, RunMode};

/// Exit code for configuration errors, distinct from test failures.
const CONFIG_ERROR_EXIT: u8 = 2;

#[derive(Parser)]
#[command(name = "pair-harness")]
#[command(about = "Run agent/client test binaries as ordered pairs and reduce their exit codes")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ~/.config/pair-harness/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured pair, suite, or relay
    Run {
        /// Orchestration mode (default: PAIR_HARNESS_MODE or pair)
        #[arg(long, value_enum)]
        mode: Option<RunMode>,

        /// Test case to run; repeat to select several (overrides TEST_TYPE)
        #[arg(long = "case")]
        cases: Vec<String>,

        /// Write a JSON report of every pair to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Settling delay between starting the two roles, in milliseconds
        #[arg(long)]
        settle_ms: Option<u64>,

        /// Kill a role that runs longer than this many seconds
        #[arg(long)]
        wait_timeout_secs: Option<u64>,
    },
    /// List the integration suite's agent/client filters
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the filter argument for one test case
    Filter {
        /// Test suite name (e.g. AgentTests)
        suite: String,

        /// Test case name (e.g. WriteData)
        case: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let configuration = e
                .downcast_ref::<HarnessError>()
                .is_some_and(HarnessError::is_configuration);
            if configuration {
                ExitCode::from(CONFIG_ERROR_EXIT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run() -> anyhow::Result<u8> {
    let cli = Cli::parse();
    let mut config = HarnessConfig::load(cli.config.as_deref(), |key| std::env::var(key).ok())?;

    match cli.command {
        Commands::Run {
            mode,
            cases,
            report,
            settle_ms,
            wait_timeout_secs,
        } => {
            RunOverrides {
                mode,
                settle_ms,
                wait_timeout_secs,
            }
            .apply(&mut config);

            let result = commands::run::run(&config, &cases)?;
            commands::run::print_report(&result);
            commands::run::save_report(&result, report.as_ref())?;
            Ok(exit_code(result.code))
        }
        Commands::List { json } => {
            commands::list::list(&config.selector, json)?;
            Ok(0)
        }
        Commands::Filter { suite, case } => {
            commands::list::filter(&config.selector, &suite, &case);
            Ok(0)
        }
    }
}
