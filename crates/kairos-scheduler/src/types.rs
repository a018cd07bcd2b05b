use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ActionError;

/// Lifecycle state of a job, as published to the result store.
///
/// ```text
/// PENDING ──► RUNNING ──► COMPLETED | FAILED | CANCELLED
///    └──────────────────────────────────────► CANCELLED
/// ```
///
/// For recurring jobs the status describes the most recent execution
/// instance; between instances it keeps that instance's terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Scheduled, not yet started.
    Pending,
    /// Action currently executing.
    Running,
    /// Action returned normally.
    Completed,
    /// Action returned an error (after exhausting retries) or panicked.
    Failed,
    /// Cancellation observed before or during execution.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Outcome of one execution instance.
#[derive(Debug, Clone)]
pub struct JobResult<T> {
    /// Terminal status of the instance this result describes.
    pub status: JobStatus,
    /// Present iff `status == Completed`.
    pub result: Option<T>,
    /// Present iff `status == Failed`.
    pub error: Option<ActionError>,
    /// 1-based execution instance number (0 when the job never ran).
    pub run: u32,
    /// Number of action attempts the retry policy spent on this instance.
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl<T> JobResult<T> {
    pub(crate) fn completed(value: T, run: u32, attempts: u32) -> Self {
        Self {
            status: JobStatus::Completed,
            result: Some(value),
            error: None,
            run,
            attempts,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn failed(error: ActionError, run: u32, attempts: u32) -> Self {
        Self {
            status: JobStatus::Failed,
            result: None,
            error: Some(error),
            run,
            attempts,
            timestamp: Utc::now(),
        }
    }

    /// A result with neither value nor error, e.g. for a cancelled job.
    pub(crate) fn bare(status: JobStatus, run: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            status,
            result: None,
            error: None,
            run,
            attempts: 0,
            timestamp,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// A job's result value with its concrete type erased.
///
/// Jobs of different result types share one store; typed reads go through
/// [`JobResult::downcast`].
#[derive(Clone)]
pub struct ErasedValue {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ErasedValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for ErasedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedValue")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

impl JobResult<ErasedValue> {
    /// Recover the typed result. `None` when the stored value is not a `T`.
    pub fn downcast<T: Any + Clone>(&self) -> Option<JobResult<T>> {
        let result = match &self.result {
            Some(erased) => Some(erased.downcast_ref::<T>()?.clone()),
            None => None,
        };
        Some(JobResult {
            status: self.status,
            result,
            error: self.error.clone(),
            run: self.run,
            attempts: self.attempts,
            timestamp: self.timestamp,
        })
    }
}

/// One result-store entry. Published as a unit, so a reader never sees a
/// status from one instance paired with a result from a later one.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub name: String,
    /// `std::any::type_name` of the job's declared result type.
    pub result_type: &'static str,
    pub status: JobStatus,
    /// Latest instance result. While `Running` this is the previous
    /// instance's result (or `None` before the first instance finishes).
    pub result: Option<JobResult<ErasedValue>>,
    /// Number of execution instances that have finished.
    pub runs: u32,
    /// Bounded history of finished instances, oldest first.
    pub history: VecDeque<JobResult<ErasedValue>>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(name: &str, result_type: &'static str) -> Self {
        Self {
            name: name.to_string(),
            result_type,
            status: JobStatus::Pending,
            result: None,
            runs: 0,
            history: VecDeque::new(),
            updated_at: Utc::now(),
        }
    }

    /// The outcome a waiter should see: the stored result when it describes
    /// the current status, otherwise a bare result carrying just the status.
    pub fn outcome(&self) -> JobResult<ErasedValue> {
        match &self.result {
            Some(r) if r.status == self.status => r.clone(),
            _ => JobResult::bare(self.status, self.runs, self.updated_at),
        }
    }
}

/// Serializable summary of a known job (see `Scheduler::list_jobs`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub runs: u32,
    pub updated_at: DateTime<Utc>,
}

/// Status transition notification sent to an optional observer channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub job_id: String,
    /// Execution instance the transition belongs to. `Pending` carries 0; a
    /// cancellation between instances carries the last finished one.
    pub run: u32,
    pub status: JobStatus,
    pub at: DateTime<Utc>,
}

/// What `cancel_job` found. Cancellation never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was waiting for its next fire time; it is now `Cancelled`.
    Cancelled,
    /// An instance is running; the token was signalled and the status turns
    /// `Cancelled` once the instance exits.
    CancellationRequested,
    /// The job had already reached a terminal state.
    AlreadyTerminal,
    /// No job with this id was ever scheduled.
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let parsed: JobStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("scheduled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn only_finished_states_are_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, r#""cancelled""#);
    }

    #[test]
    fn downcast_recovers_the_value() {
        let stored = JobResult::completed(ErasedValue::new(String::from("Hello")), 1, 1);
        let typed = stored.downcast::<String>().unwrap();
        assert_eq!(typed.result.as_deref(), Some("Hello"));
        assert_eq!(typed.status, JobStatus::Completed);
        assert!(typed.is_success());

        assert!(stored.downcast::<u64>().is_none());
    }

    #[test]
    fn downcast_of_a_failure_has_no_value() {
        let stored: JobResult<ErasedValue> = JobResult::failed(ActionError::new("nope"), 2, 3);
        let typed = stored.downcast::<u64>().unwrap();
        assert!(typed.result.is_none());
        assert!(!typed.is_success());
        assert_eq!(typed.error.unwrap().message(), "nope");
        assert_eq!(typed.attempts, 3);
    }

    #[test]
    fn outcome_ignores_a_stale_result() {
        let mut record = JobRecord::new("job", "alloc::string::String");
        record.result = Some(JobResult::completed(ErasedValue::new(String::new()), 1, 1));
        record.runs = 1;
        record.status = JobStatus::Running;
        let outcome = record.outcome();
        assert_eq!(outcome.status, JobStatus::Running);
        assert!(outcome.result.is_none());

        record.status = JobStatus::Completed;
        assert!(record.outcome().result.is_some());
    }
}
