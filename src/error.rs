//! Error types for the task relay.

use std::path::PathBuf;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },
}

/// Validation failures raised before a task is created.
///
/// Nothing is registered or queued when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Task key must not be empty")]
    EmptyKey,

    #[error("Task text must not be empty")]
    EmptyPayload,

    #[error("Invalid stop target: {0}")]
    InvalidIdentifier(String),
}

/// Failures to launch or talk to the execution backend.
///
/// These never escape the executor; they are folded into an `Outcome`.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Backend program '{program}' not found")]
    BackendNotFound { program: String },

    #[error("Working directory {0} does not exist")]
    WorkdirMissing(PathBuf),

    #[error("Failed to spawn backend: {0}")]
    Spawn(std::io::Error),

    #[error("Backend I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Project workspace errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Invalid project name '{0}'. Use alphanumeric characters, underscores, or hyphens.")]
    InvalidName(String),

    #[error("Project '{0}' already exists")]
    AlreadyExists(String),

    #[error("Project '{0}' not found")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
