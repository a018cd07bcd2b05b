//! `kairos-scheduler`: in-process, Tokio-based job scheduler.
//!
//! # Overview
//!
//! Callers build a [`JobDefinition`] (id, recurrence, retry policy, action)
//! and hand it to a [`Scheduler`]. Each active job gets its own driver task
//! that waits for the next fire instant, runs the action, and publishes the
//! outcome to a [`ResultStore`] as one atomic write. Callers poll
//! [`Scheduler::get_job_status`] or wait with [`Scheduler::await_result`].
//!
//! # Recurrence variants
//!
//! | Variant    | Behaviour                                          |
//! |------------|----------------------------------------------------|
//! | `Once`     | Single fire, immediately                           |
//! | `Delayed`  | Single fire after a delay                          |
//! | `Periodic` | Every interval, measured from the previous start   |
//! | `Repeat`   | A fixed number of fires, an interval apart         |
//!
//! Cancellation is cooperative: async actions are dropped at their next
//! `.await`, blocking actions must poll [`JobContext::is_cancelled`].

pub mod definition;
pub mod engine;
pub mod error;
pub mod recurrence;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod types;

pub use definition::{ActionFuture, JobContext, JobDefinition, JobDefinitionBuilder};
pub use engine::SchedulerEngine;
pub use error::{ActionError, Result, SchedulerError};
pub use recurrence::Recurrence;
pub use retry::{Backoff, RetryPolicy};
pub use scheduler::Scheduler;
pub use store::{InMemoryResultStore, ResultStore};
pub use types::{
    CancelOutcome, ErasedValue, JobInstance, JobRecord, JobResult, JobStatus, StatusEvent,
};
