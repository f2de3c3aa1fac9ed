//! Error taxonomy of the workspace execution core.
//!
//! `WorkspaceError` is `Clone` because a single provisioning failure is
//! handed to every caller waiting on the same environment key.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceError {
    #[error("invalid user: {0}")]
    InvalidUser(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("failed to start {language} environment: {message}")]
    EnvironmentCreationFailed { language: String, message: String },
    #[error("execution timed out after {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("failed to run command: {0}")]
    ExecFailed(String),
    #[error("environment {0} is still being created")]
    EnvironmentBusy(String),
}

impl WorkspaceError {
    /// Label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            WorkspaceError::InvalidUser(_) => "invalid_user",
            WorkspaceError::InvalidPath(_) => "invalid_path",
            WorkspaceError::Io(_) => "io",
            WorkspaceError::NotFound(_) => "not_found",
            WorkspaceError::UnsupportedLanguage(_) => "unsupported_language",
            WorkspaceError::EnvironmentCreationFailed { .. } => "environment_creation_failed",
            WorkspaceError::ExecutionTimeout { .. } => "timeout",
            WorkspaceError::MalformedMessage(_) => "malformed",
            WorkspaceError::ExecFailed(_) => "exec_failed",
            WorkspaceError::EnvironmentBusy(_) => "busy",
        }
    }
}

impl From<std::io::Error> for WorkspaceError {
    fn from(err: std::io::Error) -> Self {
        WorkspaceError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;
