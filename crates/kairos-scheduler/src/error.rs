use std::any::Any;

use thiserror::Error;

/// Errors raised by the scheduler's own bookkeeping.
///
/// Failures inside a job's action never surface here; they are recorded as
/// a `Failed` [`JobResult`](crate::types::JobResult) carrying an [`ActionError`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job definition is malformed (missing id/action, bad recurrence, ...).
    #[error("Invalid job definition: {0}")]
    Validation(String),

    /// A job with this id is still active.
    #[error("Job already scheduled: {id}")]
    DuplicateJob { id: String },

    /// No job with the given id was ever scheduled.
    #[error("Job not found: {id}")]
    UnknownJob { id: String },

    /// A blocking or async wait exceeded its budget.
    #[error("Timed out after {ms}ms waiting for job {id}")]
    Timeout { id: String, ms: u64 },

    /// The caller asked for a result type other than the one the job declared.
    #[error("Result type mismatch for job {id}: declared {declared}, requested {expected}")]
    ResultTypeMismatch {
        id: String,
        expected: &'static str,
        declared: &'static str,
    },

    /// `schedule` was called after `shutdown`.
    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Failure reported by a job action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ActionError {
    message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn cancelled() -> Self {
        Self::new("cancelled")
    }

    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::new(format!("action panicked: {detail}"))
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for ActionError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}
