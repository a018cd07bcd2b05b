use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use kairos_core::config::SchedulerConfig;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    definition::JobDefinition,
    engine::SchedulerEngine,
    error::{Result, SchedulerError},
    store::{history_of, InMemoryResultStore, ResultStore},
    types::{CancelOutcome, ErasedValue, JobInstance, JobRecord, JobResult, JobStatus, StatusEvent},
};

/// Public entry point: schedule jobs, query them and wait for their results.
///
/// Cheap to clone; clones share the same engine and store. A `Scheduler`
/// must be created inside a tokio runtime; its job tasks run on that runtime.
#[derive(Clone)]
pub struct Scheduler {
    engine: Arc<SchedulerEngine>,
    store: Arc<dyn ResultStore>,
    config: SchedulerConfig,
    handle: Handle,
}

impl Scheduler {
    /// Scheduler with an in-memory store sized from `config`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(config: SchedulerConfig) -> Self {
        let store = Arc::new(InMemoryResultStore::new(config.history_limit));
        Self::from_parts(config, store, None)
    }

    /// Scheduler backed by a caller-supplied store.
    pub fn with_store(config: SchedulerConfig, store: Arc<dyn ResultStore>) -> Self {
        Self::from_parts(config, store, None)
    }

    /// Scheduler that reports every status transition to `events`.
    pub fn with_events(config: SchedulerConfig, events: mpsc::Sender<StatusEvent>) -> Self {
        let store = Arc::new(InMemoryResultStore::new(config.history_limit));
        Self::from_parts(config, store, Some(events))
    }

    pub fn from_parts(
        config: SchedulerConfig,
        store: Arc<dyn ResultStore>,
        events: Option<mpsc::Sender<StatusEvent>>,
    ) -> Self {
        let handle = Handle::current();
        let engine = Arc::new(SchedulerEngine::new(
            Arc::clone(&store),
            events,
            handle.clone(),
        ));
        debug!(history_limit = config.history_limit, "scheduler created");
        Self {
            engine,
            store,
            config,
            handle,
        }
    }

    /// Register a job. Its first instance fires according to its recurrence.
    pub fn schedule<T>(&self, def: JobDefinition<T>) -> Result<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.engine.schedule(def)
    }

    /// Current status. Never waits.
    pub fn get_job_status(&self, id: &str) -> Result<JobStatus> {
        self.store.status(id).ok_or_else(|| unknown(id))
    }

    /// Request cancellation. Repeated calls are harmless.
    pub fn cancel_job(&self, id: &str) -> CancelOutcome {
        self.engine.cancel(id)
    }

    /// Latest stored result, if any instance has finished. While a recurring
    /// job is `Running` this is the previous instance's result; a cancelled
    /// job has none.
    pub fn get_result<T>(&self, id: &str) -> Result<Option<JobResult<T>>>
    where
        T: Any + Clone,
    {
        let record = self.store.record(id).ok_or_else(|| unknown(id))?;
        check_type::<T>(id, &record)?;
        record.result.as_ref().map(|r| typed(id, r)).transpose()
    }

    /// Wait until the job reaches a terminal status and return its outcome.
    ///
    /// `timeout = None` falls back to `scheduler.await_timeout_ms`, and waits
    /// without limit when that is unset too. For a recurring job this
    /// resolves at the first terminal status published after the call (or
    /// immediately if the job is currently between instances).
    pub async fn await_result<T>(&self, id: &str, timeout: Option<Duration>) -> Result<JobResult<T>>
    where
        T: Any + Clone,
    {
        let mut rx = self.store.subscribe(id).ok_or_else(|| unknown(id))?;
        check_type::<T>(id, &rx.borrow())?;

        let wait = rx.wait_for(|record| record.status.is_terminal());
        let record = match timeout.or_else(|| self.config.await_timeout()) {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                SchedulerError::Timeout {
                    id: id.to_string(),
                    ms: limit.as_millis() as u64,
                }
            })?,
            None => wait.await,
        }
        .map_err(|_| unknown(id))?
        .clone();

        typed(id, &record.outcome())
    }

    /// Blocking form of [`Scheduler::await_result`] for synchronous callers.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context; use
    /// `tokio::task::spawn_blocking` or a plain thread there.
    pub fn await_result_blocking<T>(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<JobResult<T>>
    where
        T: Any + Clone,
    {
        self.handle.block_on(self.await_result(id, timeout))
    }

    /// Every known job, sorted by id.
    pub fn list_jobs(&self) -> Vec<JobInstance> {
        let mut jobs: Vec<JobInstance> = self
            .store
            .list()
            .into_iter()
            .map(|(id, record)| JobInstance {
                id,
                name: record.name,
                status: record.status,
                runs: record.runs,
                updated_at: record.updated_at,
            })
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Results of the most recent finished instances, oldest first.
    pub fn history<T>(&self, id: &str) -> Result<Vec<JobResult<T>>>
    where
        T: Any + Clone,
    {
        let record = self.store.record(id).ok_or_else(|| unknown(id))?;
        check_type::<T>(id, &record)?;
        history_of(&record).iter().map(|r| typed(id, r)).collect()
    }

    /// Number of jobs that still have instances to run.
    pub fn active_jobs(&self) -> usize {
        self.engine.active_jobs()
    }

    /// Stop accepting jobs, cancel all active ones and wait for their tasks,
    /// at most `scheduler.shutdown_timeout_ms`.
    pub async fn shutdown(&self) {
        self.engine.shutdown(self.config.shutdown_timeout()).await;
        info!("scheduler shut down");
    }
}

fn unknown(id: &str) -> SchedulerError {
    SchedulerError::UnknownJob { id: id.to_string() }
}

fn check_type<T: Any>(id: &str, record: &JobRecord) -> Result<()> {
    let expected = std::any::type_name::<T>();
    if record.result_type != expected {
        return Err(SchedulerError::ResultTypeMismatch {
            id: id.to_string(),
            expected,
            declared: record.result_type,
        });
    }
    Ok(())
}

fn typed<T: Any + Clone>(id: &str, result: &JobResult<ErasedValue>) -> Result<JobResult<T>> {
    result
        .downcast::<T>()
        .ok_or_else(|| SchedulerError::ResultTypeMismatch {
            id: id.to_string(),
            expected: std::any::type_name::<T>(),
            declared: result
                .result
                .as_ref()
                .map_or("unknown", |value| value.type_name()),
        })
}
