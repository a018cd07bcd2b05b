use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    definition::{JobContext, JobDefinition},
    error::{Result, SchedulerError},
    retry::run_with_retry,
    store::ResultStore,
    types::{CancelOutcome, ErasedValue, JobResult, JobStatus, StatusEvent},
};

/// State of one job's execution slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Waiting for `fire_at`.
    Scheduled { fire_at: Instant },
    /// Instance `run` is executing.
    Running { run: u32 },
    /// No further instances; the slot is (about to be) retired.
    Terminal(JobStatus),
}

/// Engine-side record of an active job.
///
/// Every store write for the job happens while `state` is locked, which
/// makes schedule / cancel / fire transitions linearizable per id.
struct Slot {
    state: Mutex<SlotState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Slot {
    fn new(fire_at: Instant, task: JoinHandle<()>) -> Self {
        Self {
            state: Mutex::new(SlotState::Scheduled { fire_at }),
            cancel: CancellationToken::new(),
            task: Mutex::new(Some(task)),
        }
    }

    // A panicking store write must not wedge cancel/shutdown for this id.
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn is_terminal(&self) -> bool {
        matches!(*self.lock(), SlotState::Terminal(_))
    }
}

/// Core scheduler: owns one slot and one driver task per active job.
///
/// The engine itself never runs job bodies on the caller's path; each job's
/// instances run sequentially inside that job's own tokio task.
pub struct SchedulerEngine {
    slots: DashMap<String, Arc<Slot>>,
    store: Arc<dyn ResultStore>,
    /// If set, every status transition is sent here.
    events: Option<mpsc::Sender<StatusEvent>>,
    handle: Handle,
    accepting: AtomicBool,
}

impl SchedulerEngine {
    /// Create an engine that spawns its job tasks on `handle`.
    ///
    /// Pass `Some(tx)` to receive a [`StatusEvent`] for every transition.
    /// The sender is non-blocking (`try_send`) so a slow observer never
    /// stalls a job.
    pub fn new(
        store: Arc<dyn ResultStore>,
        events: Option<mpsc::Sender<StatusEvent>>,
        handle: Handle,
    ) -> Self {
        Self {
            slots: DashMap::new(),
            store,
            events,
            handle,
            accepting: AtomicBool::new(true),
        }
    }

    /// Register `def` and arm its first instance.
    ///
    /// Rejects an id whose previous slot is still active. An id whose slot
    /// is terminal is replaced, along with its store entry.
    pub fn schedule<T>(self: &Arc<Self>, def: JobDefinition<T>) -> Result<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }

        let scheduled_at = Instant::now();
        let fire_at = def
            .recurrence()
            .next_fire_time(scheduled_at, None, 0)
            .ok_or_else(|| {
                SchedulerError::Validation(format!(
                    "first fire time of job {} is out of range",
                    def.id()
                ))
            })?;

        let id = def.id().to_string();
        let name = def.name().to_string();
        let result_type = def.result_type();
        let recurrence = *def.recurrence();

        // The driver is spawned before the slot becomes visible so shutdown
        // always finds its handle; it idles until the gate opens.
        let (gate_tx, gate_rx) = oneshot::channel::<Arc<Slot>>();
        let engine = Arc::clone(self);
        let def = Arc::new(def);
        let task = self.handle.spawn(async move {
            if let Ok(slot) = gate_rx.await {
                engine.drive(def, slot, scheduled_at).await;
            }
        });
        let slot = Arc::new(Slot::new(fire_at, task));

        // Holding the map entry orders this insert against shutdown's scan
        // and against a concurrent cancel of the same id.
        match self.slots.entry(id.clone()) {
            // dropping the gate below lets the idle driver exit
            _ if !self.accepting.load(Ordering::SeqCst) => {
                return Err(SchedulerError::ShuttingDown);
            }
            Entry::Occupied(occupied) if !occupied.get().is_terminal() => {
                return Err(SchedulerError::DuplicateJob { id });
            }
            Entry::Occupied(mut occupied) => {
                self.store.register(&id, &name, result_type);
                occupied.insert(Arc::clone(&slot));
            }
            Entry::Vacant(vacant) => {
                self.store.register(&id, &name, result_type);
                vacant.insert(Arc::clone(&slot));
            }
        }

        info!(
            job_id = %id,
            name = %name,
            ?recurrence,
            recurring = recurrence.is_recurring(),
            "job scheduled"
        );
        self.emit(&id, 0, JobStatus::Pending);

        if gate_tx.send(Arc::clone(&slot)).is_err() {
            // only possible if the runtime is shutting down under us
            warn!(job_id = %id, "job driver exited before it was started");
        }
        Ok(())
    }

    /// Cancel `id`. Never fails; the outcome says what was found.
    pub fn cancel(&self, id: &str) -> CancelOutcome {
        let Some(slot) = self.slots.get(id).map(|s| Arc::clone(s.value())) else {
            return if self.store.status(id).is_some() {
                CancelOutcome::AlreadyTerminal
            } else {
                CancelOutcome::NotFound
            };
        };

        let mut state = slot.lock();
        match *state {
            SlotState::Scheduled { .. } => {
                *state = SlotState::Terminal(JobStatus::Cancelled);
                let runs = self.store.record(id).map_or(0, |r| r.runs);
                self.store.put(id, JobStatus::Cancelled, None);
                slot.cancel.cancel();
                drop(state);
                info!(job_id = %id, runs, "job cancelled before its next run");
                self.emit(id, runs, JobStatus::Cancelled);
                CancelOutcome::Cancelled
            }
            SlotState::Running { run } => {
                slot.cancel.cancel();
                drop(state);
                info!(job_id = %id, run, "cancellation requested for running job");
                CancelOutcome::CancellationRequested
            }
            SlotState::Terminal(_) => CancelOutcome::AlreadyTerminal,
        }
    }

    /// Number of jobs with a live slot.
    pub fn active_jobs(&self) -> usize {
        self.slots.len()
    }

    /// Stop accepting jobs, cancel every active one and wait up to `grace`
    /// for their tasks to exit. Tasks still running after that are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!("scheduler engine shutting down");
        }

        let ids: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        let mut tasks = Vec::new();
        for id in &ids {
            self.cancel(id);
            if let Some(slot) = self.slots.get(id).map(|s| Arc::clone(s.value())) {
                if let Some(task) = slot.take_task() {
                    tasks.push(task);
                }
            }
        }

        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
        let count = tasks.len();
        if tokio::time::timeout(grace, futures_util::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!(
                count,
                grace_ms = grace.as_millis() as u64,
                "job tasks did not exit in time; aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }
        info!(count, "scheduler engine stopped");
    }

    // --- private helpers ---------------------------------------------------

    /// Driver loop for one job: wait, run, publish, re-arm.
    async fn drive<T>(
        self: Arc<Self>,
        def: Arc<JobDefinition<T>>,
        slot: Arc<Slot>,
        scheduled_at: Instant,
    ) where
        T: Clone + Send + Sync + 'static,
    {
        let id = def.id();
        let mut runs: u32 = 0;

        loop {
            let fire_at = match *slot.lock() {
                SlotState::Scheduled { fire_at } => fire_at,
                _ => break,
            };
            debug!(job_id = %id, run = runs + 1, "waiting for fire time");

            tokio::select! {
                biased;
                _ = slot.cancel.cancelled() => break,
                _ = tokio::time::sleep_until(fire_at) => {}
            }

            let run = runs + 1;
            let fired_at = Instant::now();
            {
                let mut state = slot.lock();
                if !matches!(*state, SlotState::Scheduled { .. }) {
                    break;
                }
                *state = SlotState::Running { run };
                self.store.set_status(id, JobStatus::Running);
            }
            info!(job_id = %id, run, "job instance started");
            self.emit(id, run, JobStatus::Running);

            let ctx = JobContext::new(id, run, slot.cancel.clone());
            let (outcome, attempts) = run_with_retry(def.action(), def.retry_policy(), &ctx).await;
            runs = run;

            let next = def
                .recurrence()
                .next_fire_time(scheduled_at, Some(fired_at), runs);

            let status = {
                let mut state = slot.lock();
                if slot.cancel.is_cancelled() {
                    self.store.put(id, JobStatus::Cancelled, None);
                    *state = SlotState::Terminal(JobStatus::Cancelled);
                    JobStatus::Cancelled
                } else {
                    let result = match outcome {
                        Ok(value) => JobResult::completed(ErasedValue::new(value), run, attempts),
                        Err(err) => {
                            warn!(job_id = %id, run, attempts, error = %err, "job instance failed");
                            JobResult::failed(err, run, attempts)
                        }
                    };
                    let status = result.status;
                    self.store.put(id, status, Some(result));
                    *state = match next {
                        Some(fire_at) => SlotState::Scheduled { fire_at },
                        None => SlotState::Terminal(status),
                    };
                    status
                }
            };
            let rearmed = next.is_some() && status != JobStatus::Cancelled;
            info!(job_id = %id, run, %status, rearmed, "job instance finished");
            self.emit(id, run, status);
        }

        // Only retire our own slot; the id may already belong to a newer job.
        self.slots.remove_if(id, |_, s| Arc::ptr_eq(s, &slot));
        debug!(job_id = %id, runs, "job slot retired");
    }

    fn emit(&self, id: &str, run: u32, status: JobStatus) {
        if let Some(ref tx) = self.events {
            let event = StatusEvent {
                job_id: id.to_string(),
                run,
                status,
                at: Utc::now(),
            };
            // try_send never blocks a job; log a warning if the channel is full.
            if tx.try_send(event).is_err() {
                warn!(job_id = %id, %status, "status event channel full or closed, event dropped");
            }
        }
    }
}
