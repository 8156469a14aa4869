//! List and filter commands
//!
//! Show the filter arguments the harness would pass, without launching
//! anything.

use anyhow::Result;

use crate::selector::{select_filter, CasePair, Selector};

/// Render the integration suite, one case per line or as JSON.
pub fn render_suite(selector: &Selector, json: bool) -> Result<String> {
    let suite: Vec<CasePair> = selector.integration_suite();
    if json {
        return Ok(serde_json::to_string_pretty(&suite)?);
    }

    let width = suite.iter().map(|p| p.case.len()).max().unwrap_or(0);
    let lines: Vec<String> = suite
        .iter()
        .map(|p| {
            format!(
                "{:<width$}  {}  {}",
                p.case,
                p.agent_filter,
                p.client_filter,
                width = width
            )
        })
        .collect();
    Ok(lines.join("\n"))
}

/// Print the integration suite.
pub fn list(selector: &Selector, json: bool) -> Result<()> {
    println!("{}", render_suite(selector, json)?);
    Ok(())
}

/// Print the filter argument for a single case.
pub fn filter(selector: &Selector, suite: &str, case: &str) {
    println!("{}", select_filter(&selector.flag, suite, case));
}
