use std::time::Duration;

use thiserror::Error;

/// Error types for pair-harness operations.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Missing required configuration '{key}' (set it in the config file or the {env} env var)")]
    ConfigurationMissing { key: &'static str, env: &'static str },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to launch {role} ({executable}): {source}")]
    LaunchFailure {
        role: String,
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{role} exited with status {code}")]
    UnexpectedExit { role: String, code: i32 },

    #[error("{role} did not exit within {after:?}")]
    Timeout { role: String, after: Duration },

    #[error("{role} never became ready: {reason}")]
    NotReady { role: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Whether this error means the run could not even be configured.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            HarnessError::ConfigurationMissing { .. } | HarnessError::InvalidConfiguration(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
