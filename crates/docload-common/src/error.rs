//! Error types for docload

use thiserror::Error;

use crate::job::JobStatus;

/// Result type alias for docload operations
pub type Result<T> = std::result::Result<T, DocloadError>;

/// Main error type for docload
#[derive(Error, Debug)]
pub enum DocloadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job {job_id} is already {status}")]
    JobFinished { job_id: String, status: JobStatus },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Job store error: {0}")]
    Store(String),
}
