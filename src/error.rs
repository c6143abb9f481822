use crate::config::ImportConfigError;
use std::io;
use thiserror::Error;
use tokio::sync::AcquireError;
use tokio::task::JoinError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API request failed: {0} ({1})")]
    HttpStatus(u16, String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid task config: {0}")]
    InvalidTaskConfig(String),

    #[error("{0}")]
    Process(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    MissingOutput(String),

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Task {0} not found")]
    TaskNotFound(u32),

    #[error("Resource {0} not found")]
    ResourceNotFound(u32),

    #[error("Backup {0} not found")]
    BackupNotFound(String),

    #[error("Illegal status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Task {0} is already running")]
    TaskAlreadyRunning(u32),

    #[error("Task {0} is cancelled")]
    Canceled(u32),

    #[error("Unsupported task type: {0}")]
    UnsupportedTaskType(String),

    #[error("Unsupported database driver: {0}")]
    UnsupportedDriver(String),

    #[error("Task join error: {0}")]
    JoinError(String),

    #[error("Semaphore acquire error: {0}")]
    AcquireError(String),

    #[error("{0}")]
    Other(String),
}

impl ImportError {
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        ImportError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<sqlx::Error> for ImportError {
    fn from(err: sqlx::Error) -> Self {
        ImportError::Database(err.to_string())
    }
}

impl From<io::Error> for ImportError {
    fn from(err: io::Error) -> Self {
        ImportError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for ImportError {
    fn from(err: reqwest::Error) -> Self {
        ImportError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for ImportError {
    fn from(err: url::ParseError) -> Self {
        ImportError::InvalidTaskConfig(format!("invalid URL: {}", err))
    }
}

impl From<JoinError> for ImportError {
    fn from(err: JoinError) -> Self {
        ImportError::JoinError(err.to_string())
    }
}

impl From<AcquireError> for ImportError {
    fn from(err: AcquireError) -> Self {
        ImportError::AcquireError(err.to_string())
    }
}

impl From<ImportConfigError> for ImportError {
    fn from(err: ImportConfigError) -> Self {
        ImportError::ConfigError(err.to_string())
    }
}

impl From<String> for ImportError {
    fn from(s: String) -> Self {
        ImportError::Other(s)
    }
}

impl From<&str> for ImportError {
    fn from(s: &str) -> Self {
        ImportError::Other(s.to_string())
    }
}
