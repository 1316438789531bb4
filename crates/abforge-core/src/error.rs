//! Error types for abforge
//!
//! Every failure the experiment pipeline can surface is named here. Library
//! crates return [`Result`]; the CLI wraps these in `anyhow` at the top level.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for abforge operations
pub type Result<T> = std::result::Result<T, AbforgeError>;

/// Main error type for abforge operations
#[derive(Error, Debug)]
pub enum AbforgeError {
    /// The contract JSON violated one or more constraints
    #[error(transparent)]
    ContractValidation(#[from] ContractValidationError),

    /// Source patching errors
    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    /// One or more code changes could not be applied
    #[error("{} of {total} code change(s) failed:\n{}", .failures.len(), .failures.join("\n"))]
    CodeChanges {
        total: usize,
        failures: Vec<String>,
    },

    /// Git subprocess errors
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    /// A SaaS API answered with a non-2xx status
    #[error("{service} API error ({status}): {body}")]
    RemoteApi {
        service: String,
        status: u16,
        body: String,
    },

    /// A SaaS API could not be reached
    #[error("{service} transport error: {message}")]
    Transport { service: String, message: String },

    /// Deployment polling exceeded its budget
    #[error("Deployment {id} not ready after {timeout_ms}ms")]
    DeploymentTimeout { id: String, timeout_ms: u64 },

    /// Deployment reached a failed terminal state
    #[error("Deployment {id} finished in state {state}: {message}")]
    DeploymentFailed {
        id: String,
        state: String,
        message: String,
    },

    /// Required environment variables are absent
    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    /// An environment variable is present but malformed
    #[error("Invalid environment variable {name}: {reason}")]
    InvalidEnv { name: String, reason: String },

    /// An offline client has no entity with this id
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<AbforgeError>,
    },
}

/// Every constraint a contract violated, as `"<field path>: <message>"` lines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Contract validation failed:\n{}", .issues.join("\n"))]
pub struct ContractValidationError {
    pub issues: Vec<String>,
}

impl ContractValidationError {
    pub fn new(issues: Vec<String>) -> Self {
        Self { issues }
    }

    /// True when any issue is reported against `path` or one of its children
    pub fn mentions(&self, path: &str) -> bool {
        self.issues.iter().any(|issue| issue.starts_with(path))
    }
}

/// Errors raised by the source patcher
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Target `{function}` not found in {}", .file.display())]
    TargetNotFound { function: String, file: PathBuf },

    #[error("Target `{function}` in {} has no block body to instrument", .file.display())]
    NoBlockBody { function: String, file: PathBuf },

    #[error("`{function}` in {} is already instrumented for experiment {key}", .file.display())]
    AlreadyPatched {
        key: String,
        function: String,
        file: PathBuf,
    },

    #[error("Patched source of {} no longer parses cleanly", .file.display())]
    SyntaxRegression { file: PathBuf },

    #[error("Unsupported source file: {}", .0.display())]
    UnsupportedFile(PathBuf),

    #[error("Rollback copy not found for {}", .0.display())]
    RollbackNotFound(PathBuf),

    #[error("Parser error: {0}")]
    Parser(String),

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors raised by git subprocesses
#[derive(Error, Debug, Clone)]
pub enum GitError {
    #[error("`git {args}` exited with {code}: {stderr}")]
    CommandFailed {
        args: String,
        code: i32,
        stderr: String,
    },

    #[error("Unable to launch git: {0}")]
    Spawn(String),
}

impl AbforgeError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn remote(service: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::RemoteApi {
            service: service.into(),
            status,
            body: body.into(),
        }
    }

    pub fn transport(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Unwraps context layers down to the originating error
    pub fn root(&self) -> &AbforgeError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<AbforgeError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context() {
        let err = AbforgeError::from(PatchError::FileNotFound(PathBuf::from("src/Button.tsx")));
        let err = err.context("Failed to apply code change");

        assert!(err.to_string().contains("Failed to apply code change"));
        assert!(matches!(
            err.root(),
            AbforgeError::Patch(PatchError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(AbforgeError::remote("statsig", 500, "boom"));
        let result = result.context("Creating experiment");

        let message = result.unwrap_err().to_string();
        assert!(message.contains("Creating experiment"));
        assert!(message.contains("statsig API error (500): boom"));
    }

    #[test]
    fn test_missing_env_lists_every_variable() {
        let err = AbforgeError::MissingEnv(vec![
            "STATSIG_CONSOLE_API_KEY".to_string(),
            "VERCEL_TOKEN".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Missing required environment variables: STATSIG_CONSOLE_API_KEY, VERCEL_TOKEN"
        );
    }

    #[test]
    fn test_validation_error_joins_issues_by_line() {
        let err = ContractValidationError::new(vec![
            "variants: at least 2 variants are required".to_string(),
            "codeChanges: at least 1 code change is required".to_string(),
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("variants: at least 2 variants are required\ncodeChanges"));
        assert!(err.mentions("variants"));
        assert!(!err.mentions("branchConfig"));
    }
}
