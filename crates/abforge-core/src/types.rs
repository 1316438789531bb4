//! Shared value types for the experiment pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Outcome of instrumenting one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeModificationResult {
    pub success: bool,
    pub file: PathBuf,
    /// Human-readable description of each edit applied
    pub changes: Vec<String>,
    pub errors: Vec<String>,
}

impl CodeModificationResult {
    pub fn applied(file: impl AsRef<Path>, changes: Vec<String>) -> Self {
        Self {
            success: true,
            file: file.as_ref().to_path_buf(),
            changes,
            errors: Vec::new(),
        }
    }

    pub fn failed(file: impl AsRef<Path>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            file: file.as_ref().to_path_buf(),
            changes: Vec::new(),
            errors: vec![error.into()],
        }
    }
}

/// Lifecycle state of a remote experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Setup,
    Active,
    Stopped,
    /// Any status the service reports that this tool does not model
    #[serde(other)]
    Unknown,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build state of a preview deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    Queued,
    Initializing,
    Building,
    Ready,
    Error,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl DeploymentState {
    /// READY, ERROR and CANCELED end the polling loop
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error | Self::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Initializing => "INITIALIZING",
            Self::Building => "BUILDING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
            Self::Canceled => "CANCELED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the experiment branch for a key
pub fn branch_for_key(key: &str) -> String {
    format!("exp/{}", key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_states_deserialize_from_vercel_casing() {
        let state: DeploymentState = serde_json::from_str("\"READY\"").unwrap();
        assert_eq!(state, DeploymentState::Ready);
        assert!(state.is_terminal());

        let state: DeploymentState = serde_json::from_str("\"BUILDING\"").unwrap();
        assert!(!state.is_terminal());

        let state: DeploymentState = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(state, DeploymentState::Unknown);
    }

    #[test]
    fn experiment_status_tolerates_unmodelled_values() {
        let status: ExperimentStatus = serde_json::from_str("\"decision_made\"").unwrap();
        assert_eq!(status, ExperimentStatus::Unknown);
        assert_eq!(ExperimentStatus::Active.to_string(), "active");
    }
}
