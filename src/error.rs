//! Error types for promptd.

use uuid::Uuid;

/// Top-level error type for the daemon.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("Reclamation error: {0}")]
    Reclaim(#[from] ReclaimError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Queue protocol misuse by a caller. Logged, never crash-worthy.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Completion already recorded for prompt {id}")]
    DuplicateCompletion { id: Uuid },
}

/// Job-level execution failures. Contained within one worker iteration and
/// reported through the prompt's completion record.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Execution failed: {reason}")]
    Failed { reason: String },

    #[error("Execution interrupted")]
    Interrupted,
}

/// Resource reclamation failures. Fatal to the worker — resource exhaustion
/// is unrecoverable for this process.
#[derive(Debug, thiserror::Error)]
pub enum ReclaimError {
    #[error("Device operation {op} failed: {reason}")]
    Device { op: String, reason: String },
}

/// Result type alias for the daemon.
pub type Result<T> = std::result::Result<T, Error>;
