//! Result store: job id → latest status and result.
//!
//! The engine is the only writer and writes each id while holding that
//! job's slot lock, so per-id writes are already serialized. The store only
//! has to publish each write atomically and let many readers (and waiters)
//! observe it.

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::types::{ErasedValue, JobRecord, JobResult, JobStatus};

/// Pluggable backend for job status and results.
///
/// Implementations must publish a status together with its result as one
/// value: a reader taking a [`JobRecord`] snapshot never sees one instance's
/// status paired with another instance's result.
pub trait ResultStore: Send + Sync {
    /// Create the entry for `id`, or reset an existing one, to `Pending`
    /// with no result and empty history.
    fn register(&self, id: &str, name: &str, result_type: &'static str);

    /// Publish `status` and `result` in one write. A `Some` result is also
    /// appended to the history; `None` clears the current result.
    fn put(&self, id: &str, status: JobStatus, result: Option<JobResult<ErasedValue>>);

    /// Change only the status; the current result stays attached.
    fn set_status(&self, id: &str, status: JobStatus);

    fn record(&self, id: &str) -> Option<JobRecord>;

    fn status(&self, id: &str) -> Option<JobStatus> {
        self.record(id).map(|r| r.status)
    }

    fn result(&self, id: &str) -> Option<JobResult<ErasedValue>> {
        self.record(id).and_then(|r| r.result)
    }

    /// Receiver that observes every write for `id`.
    fn subscribe(&self, id: &str) -> Option<watch::Receiver<JobRecord>>;

    /// All entries, in no particular order.
    fn list(&self) -> Vec<(String, JobRecord)>;

    fn remove(&self, id: &str) -> bool;

    fn clear(&self);
}

/// In-process store: one `watch` channel per job id inside a `DashMap`, so
/// contention is limited to the shard holding the id.
pub struct InMemoryResultStore {
    entries: DashMap<String, watch::Sender<JobRecord>>,
    history_limit: usize,
}

impl InMemoryResultStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            entries: DashMap::new(),
            history_limit,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut JobRecord)) {
        match self.entries.get(id) {
            Some(tx) => tx.send_modify(|record| {
                f(record);
                record.updated_at = Utc::now();
            }),
            None => warn!(job_id = %id, "write for unregistered job ignored"),
        }
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new(kairos_core::config::DEFAULT_HISTORY_LIMIT)
    }
}

impl ResultStore for InMemoryResultStore {
    fn register(&self, id: &str, name: &str, result_type: &'static str) {
        let fresh = JobRecord::new(name, result_type);
        // Reuse an existing sender so waiters subscribed to a previous
        // incarnation of this id keep receiving updates.
        self.entries
            .entry(id.to_string())
            .and_modify(|tx| {
                tx.send_replace(fresh.clone());
            })
            .or_insert_with(|| watch::channel(fresh.clone()).0);
        debug!(job_id = %id, "store entry registered");
    }

    fn put(&self, id: &str, status: JobStatus, result: Option<JobResult<ErasedValue>>) {
        let limit = self.history_limit;
        self.modify(id, |record| {
            record.status = status;
            if let Some(r) = &result {
                record.runs = record.runs.max(r.run);
                if limit > 0 {
                    record.history.push_back(r.clone());
                    while record.history.len() > limit {
                        record.history.pop_front();
                    }
                }
            }
            record.result = result;
        });
    }

    fn set_status(&self, id: &str, status: JobStatus) {
        self.modify(id, |record| record.status = status);
    }

    fn record(&self, id: &str) -> Option<JobRecord> {
        self.entries.get(id).map(|tx| tx.borrow().clone())
    }

    fn status(&self, id: &str) -> Option<JobStatus> {
        self.entries.get(id).map(|tx| tx.borrow().status)
    }

    fn result(&self, id: &str) -> Option<JobResult<ErasedValue>> {
        self.entries.get(id).and_then(|tx| tx.borrow().result.clone())
    }

    fn subscribe(&self, id: &str) -> Option<watch::Receiver<JobRecord>> {
        self.entries.get(id).map(|tx| tx.subscribe())
    }

    fn list(&self) -> Vec<(String, JobRecord)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().borrow().clone()))
            .collect()
    }

    fn remove(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// Copy of a history deque as a `Vec`, oldest first.
pub(crate) fn history_of(record: &JobRecord) -> Vec<JobResult<ErasedValue>> {
    record.history.iter().cloned().collect()
}
