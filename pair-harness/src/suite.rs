//! Sequential suite runs
//!
//! Pairs in a suite may bind the same endpoints, so they never overlap: each
//! pair's processes are reaped before the next pair starts. A failing pair is
//! recorded and the run moves on.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::coordinator::{PairCoordinator, PairOutcome, TestPair};
use crate::launcher::Launcher;
use crate::reducer::reduce;

/// Outcome of every pair in a run.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<PairOutcome>,
    /// Reduced result of the whole run
    pub code: i32,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        self.code == 0
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.passed()).count()
    }

    /// Write the report as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write report at {}", path.display()))?;
        Ok(())
    }
}

/// Run `pairs` one after another and reduce their results.
pub fn run_suite<L: Launcher>(coordinator: &PairCoordinator<L>, pairs: &[TestPair]) -> SuiteReport {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!(%run_id, pairs = pairs.len(), "starting suite");

    let outcomes: Vec<PairOutcome> = pairs.iter().map(|pair| coordinator.run_pair(pair)).collect();
    let code = reduce(outcomes.iter().map(|o| o.code));

    info!(
        %run_id,
        code,
        failed = outcomes.iter().filter(|o| !o.passed()).count(),
        "suite finished"
    );

    SuiteReport {
        run_id,
        started_at,
        outcomes,
        code,
    }
}
