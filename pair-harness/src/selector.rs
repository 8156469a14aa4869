//! Test-case selection
//!
//! Builds the filter arguments that restrict a test binary to one case, and
//! owns the canonical list of agent/client case pairs that make up the
//! integration suite.

use serde::Serialize;

use crate::error::{HarnessError, Result};

/// Filter flag understood by googletest binaries.
pub const GTEST_FILTER_FLAG: &str = "--gtest_filter=";

/// Default suite prefix for agent-side cases.
pub const AGENT_SUITE: &str = "AgentTests";

/// Default suite prefix for client-side cases.
pub const CLIENT_SUITE: &str = "ClientTests";

/// Lifecycle operations exercised by the integration suite, in run order.
pub const INTEGRATION_CASES: [&str; 7] = [
    "CreateDeleteClient",
    "CreateDeleteParticipant",
    "CreateDeletePublisher",
    "CreateDeleteSubscriber",
    "CreateDeleteDataWriter",
    "CreateDeleteDataReader",
    "WriteData",
];

/// Build the filter argument selecting `suite.case`.
pub fn select_filter(flag: &str, suite: &str, case: &str) -> String {
    format!("{}{}.{}", flag, suite, case)
}

/// One integration case as seen by both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CasePair {
    pub case: String,
    pub agent_filter: String,
    pub client_filter: String,
}

/// Naming conventions for turning case names into filter arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub flag: String,
    pub agent_suite: String,
    pub client_suite: String,
}

impl Default for Selector {
    fn default() -> Self {
        Self {
            flag: GTEST_FILTER_FLAG.to_string(),
            agent_suite: AGENT_SUITE.to_string(),
            client_suite: CLIENT_SUITE.to_string(),
        }
    }
}

impl Selector {
    /// Pair up the agent and client filters for a single case.
    pub fn case_pair(&self, case: &str) -> CasePair {
        CasePair {
            case: case.to_string(),
            agent_filter: select_filter(&self.flag, &self.agent_suite, case),
            client_filter: select_filter(&self.flag, &self.client_suite, case),
        }
    }

    /// The full integration suite, in canonical order.
    pub fn integration_suite(&self) -> Vec<CasePair> {
        INTEGRATION_CASES
            .iter()
            .map(|case| self.case_pair(case))
            .collect()
    }

    /// The integration suite restricted to `cases`, keeping canonical order.
    ///
    /// An empty selection means the whole suite. Unknown names are rejected
    /// up front so nothing is launched for a typo.
    pub fn select_cases(&self, cases: &[String]) -> Result<Vec<CasePair>> {
        if cases.is_empty() {
            return Ok(self.integration_suite());
        }

        if let Some(unknown) = cases
            .iter()
            .find(|c| !INTEGRATION_CASES.contains(&c.as_str()))
        {
            return Err(HarnessError::InvalidConfiguration(format!(
                "unknown integration case '{}'. Known cases: {}",
                unknown,
                INTEGRATION_CASES.join(", ")
            )));
        }

        Ok(INTEGRATION_CASES
            .iter()
            .filter(|known| cases.iter().any(|c| c == *known))
            .map(|case| self.case_pair(case))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_filter_is_deterministic() {
        let first = select_filter(GTEST_FILTER_FLAG, "AgentTests", "WriteData");
        let second = select_filter(GTEST_FILTER_FLAG, "AgentTests", "WriteData");
        assert_eq!(first, "--gtest_filter=AgentTests.WriteData");
        assert_eq!(first, second);
    }

    #[test]
    fn test_case_pair_uses_both_suites() {
        let pair = Selector::default().case_pair("CreateDeleteClient");
        assert_eq!(pair.agent_filter, "--gtest_filter=AgentTests.CreateDeleteClient");
        assert_eq!(pair.client_filter, "--gtest_filter=ClientTests.CreateDeleteClient");
    }

    #[test]
    fn test_integration_suite_order() {
        let suite = Selector::default().integration_suite();
        assert_eq!(suite.len(), 7);
        assert_eq!(suite[0].case, "CreateDeleteClient");
        assert_eq!(suite[6].case, "WriteData");
        assert_eq!(suite[6].client_filter, "--gtest_filter=ClientTests.WriteData");
    }

    #[test]
    fn test_custom_flag() {
        let selector = Selector {
            flag: "--filter=".to_string(),
            agent_suite: "Agent".to_string(),
            client_suite: "Client".to_string(),
        };
        let pair = selector.case_pair("WriteData");
        assert_eq!(pair.agent_filter, "--filter=Agent.WriteData");
        assert_eq!(pair.client_filter, "--filter=Client.WriteData");
    }

    #[test]
    fn test_select_cases_keeps_canonical_order() {
        let selected = Selector::default()
            .select_cases(&["WriteData".to_string(), "CreateDeleteClient".to_string()])
            .unwrap();
        let names: Vec<_> = selected.iter().map(|p| p.case.as_str()).collect();
        assert_eq!(names, vec!["CreateDeleteClient", "WriteData"]);
    }

    #[test]
    fn test_select_cases_empty_is_everything() {
        let selected = Selector::default().select_cases(&[]).unwrap();
        assert_eq!(selected.len(), INTEGRATION_CASES.len());
    }

    #[test]
    fn test_select_cases_rejects_unknown() {
        let err = Selector::default()
            .select_cases(&["DeleteEverything".to_string()])
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("DeleteEverything"));
    }
}
