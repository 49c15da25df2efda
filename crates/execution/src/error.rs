//! Execution errors.

use jobworker_core::JobId;
use jobworker_storage::StorageError;

/// Result type for execution operations.
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Errors that abort a job run or a worker slot.
///
/// Task-level failures never show up here; they are recorded on the task.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The intake queue handed out an id with no stored job
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// Storage failure while loading a job
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Token issuance failed
    #[error("Token error: {0}")]
    Token(String),

    /// HTTP client failure outside of task execution
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The task workers of a slot stopped while a job was running
    #[error("Task workers exited unexpectedly")]
    WorkersGone,
}
