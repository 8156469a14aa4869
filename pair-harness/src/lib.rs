//! pair-harness library
//!
//! Paired-process integration test orchestration: launch two test binaries
//! in a fixed order, wait for them (or kill one side), and reduce their exit
//! statuses into one verdict.

pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod failure;
pub mod launcher;
pub mod readiness;
pub mod reducer;
pub mod selector;
pub mod suite;

pub use config::{HarnessConfig, RunMode};
pub use coordinator::{PairCoordinator, PairOutcome, PairSettings, TerminationPolicy, TestPair, TestRole};
pub use error::HarnessError;
pub use failure::{CategorizedFailure, FailureCategory};
pub use launcher::{ExitOutcome, Launcher, RoleProcess, SystemLauncher};
pub use suite::SuiteReport;
