//! Failure categorization for pair runs
//!
//! Categorizes why a pair did not pass:
//! - Launch: the OS could not start one of the roles
//! - Readiness: the first role never became ready for its counterpart
//! - Exit: a role reported a non-zero status
//! - Timeout: a role outlived the configured wait limit

use std::fmt;

use serde::Serialize;

use crate::error::HarnessError;

/// Category of failure for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// A role could not be spawned
    Launch,
    /// The first role exited or stalled before it was ready
    Readiness,
    /// A role exited with a non-zero status
    Exit,
    /// A role was killed after exceeding the wait timeout
    Timeout,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCategory::Launch => write!(f, "Launch"),
            FailureCategory::Readiness => write!(f, "Readiness"),
            FailureCategory::Exit => write!(f, "Exit"),
            FailureCategory::Timeout => write!(f, "Timeout"),
        }
    }
}

/// A failure with category and details
#[derive(Debug, Clone, Serialize)]
pub struct CategorizedFailure {
    /// Category of the failure
    pub category: FailureCategory,
    /// Short description of what failed
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CategorizedFailure {
    /// Create a new categorized failure
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            details: None,
        }
    }

    /// Add details to the failure
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Categorize a harness error raised while running a pair
    pub fn from_error(error: &HarnessError) -> Self {
        let category = match error {
            HarnessError::LaunchFailure { .. } => FailureCategory::Launch,
            HarnessError::NotReady { .. } => FailureCategory::Readiness,
            HarnessError::Timeout { .. } => FailureCategory::Timeout,
            HarnessError::UnexpectedExit { .. }
            | HarnessError::Io(_)
            | HarnessError::ConfigurationMissing { .. }
            | HarnessError::InvalidConfiguration(_) => FailureCategory::Exit,
        };
        let message = match error {
            HarnessError::LaunchFailure {
                role, executable, ..
            } => format!("Could not launch {} ({})", role, executable),
            other => other.to_string(),
        };
        let failure = Self::new(category, message);
        match error {
            HarnessError::LaunchFailure { source, .. } => failure.with_details(source.to_string()),
            _ => failure,
        }
    }
}

impl fmt::Display for CategorizedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " - {}", details)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_failure_display() {
        let failure = CategorizedFailure::new(FailureCategory::Launch, "Could not launch agent")
            .with_details("No such file or directory");
        assert_eq!(
            format!("{}", failure),
            "[Launch] Could not launch agent - No such file or directory"
        );
    }

    #[test]
    fn test_from_error_categories() {
        let launch = CategorizedFailure::from_error(&HarnessError::LaunchFailure {
            role: "client".to_string(),
            executable: "/missing/client".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        });
        assert_eq!(launch.category, FailureCategory::Launch);
        assert_eq!(launch.details.as_deref(), Some("gone"));

        let timeout = CategorizedFailure::from_error(&HarnessError::Timeout {
            role: "agent".to_string(),
            after: Duration::from_secs(5),
        });
        assert_eq!(timeout.category, FailureCategory::Timeout);

        let ready = CategorizedFailure::from_error(&HarnessError::NotReady {
            role: "agent".to_string(),
            reason: "exited early".to_string(),
        });
        assert_eq!(ready.category, FailureCategory::Readiness);
    }

    #[test]
    fn test_unexpected_exit_message() {
        let failure = CategorizedFailure::from_error(&HarnessError::UnexpectedExit {
            role: "client".to_string(),
            code: 1,
        });
        assert_eq!(failure.category, FailureCategory::Exit);
        assert_eq!(format!("{}", failure), "[Exit] client exited with status 1");
    }

    #[test]
    fn test_category_display() {
        assert_eq!(format!("{}", FailureCategory::Launch), "Launch");
        assert_eq!(format!("{}", FailureCategory::Readiness), "Readiness");
        assert_eq!(format!("{}", FailureCategory::Exit), "Exit");
        assert_eq!(format!("{}", FailureCategory::Timeout), "Timeout");
    }
}
