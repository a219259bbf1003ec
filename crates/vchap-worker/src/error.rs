//! Worker error types.
//!
//! Every failure is classified into one of four categories, and the
//! category alone decides retry behavior: validation and not-found errors
//! surface to the caller, transient errors are retried up to the queue's
//! delivery cap, fatal errors fail the job immediately.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Caller error: bad input or an operation invalid in the current state.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Infrastructure hiccup; retrying may succeed.
    #[error("Transient error: {0}")]
    Transient(String),

    /// Unrecoverable failure; retrying will not help.
    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Job state error: {0}")]
    Job(#[from] vchap_models::JobError),

    #[error("Queue error: {0}")]
    Queue(#[from] vchap_queue::QueueError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Check if the error is worth redelivering the task for.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Transient(_) | WorkerError::Queue(_) | WorkerError::Io(_) => true,
            WorkerError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Check if the error is the caller's fault rather than the system's.
    pub fn is_validation(&self) -> bool {
        matches!(self, WorkerError::Validation(_) | WorkerError::Job(_))
    }

    /// Check if the error names a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkerError::NotFound(_))
    }
}
