//! Job lifecycle coordinator.
//!
//! Owns the authoritative job table and performs every state transition.
//!
//! # Architecture
//!
//! ```text
//! dispatch loop                          response loop
//!     │                                       │
//!     ├─► generate_job(type) ──► table        ├─► handle_response(msg)
//!     └─► queue_job(id)                       │       ├─► jobID from metadata
//!             ├─► publish (no lock held)      │       ├─► table lookup
//!             └─► [entry lock]                │       ├─► decode body
//!                    mark_queued + persist    │       └─► [entry lock]
//!                                             │              complete/fail + persist
//! ```
//!
//! # Locking
//!
//! The table is a `DashMap`; its shard locks are only held long enough to
//! look up or insert an entry. Each entry carries its own async mutex which
//! is held for the whole transition-then-persist sequence of that job, so
//! two transitions on one job never interleave and the store sees snapshots
//! in the same order the table applied them. Publishing happens without any
//! lock, which lets a response overtake the dispatch confirmation: when that
//! happens the late `Queued` transition is skipped instead of regressing the
//! terminal state.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::adapters::{QueuePublisher, StateStore};
use crate::error::{CoordinatorError, DiscardReason};
use crate::job::{Job, JobId, JobState, Transition};
use crate::response::{correlation_metadata, InboundMessage, ResponseOutcome};

type Result<T, E = CoordinatorError> = std::result::Result<T, E>;

type JobSlot = Arc<Mutex<Job>>;

type IdSource = Box<dyn Fn() -> JobId + Send + Sync>;

/// Owner of the in-memory job table.
pub struct Coordinator {
    jobs: DashMap<JobId, JobSlot>,
    publisher: Arc<dyn QueuePublisher>,
    store: Arc<dyn StateStore>,
    next_id: IdSource,
}

impl Coordinator {
    pub fn new(publisher: Arc<dyn QueuePublisher>, store: Arc<dyn StateStore>) -> Self {
        Self {
            jobs: DashMap::new(),
            publisher,
            store,
            next_id: Box::new(JobId::new),
        }
    }

    /// Replace the identifier generator (random v4 UUIDs by default).
    pub fn with_id_source(mut self, next_id: impl Fn() -> JobId + Send + Sync + 'static) -> Self {
        self.next_id = Box::new(next_id);
        self
    }

    /// Create a `Created` job of `job_type` and insert it into the table.
    ///
    /// Fails only if the fresh identifier is already taken.
    pub fn generate_job(&self, job_type: &str) -> Result<Job> {
        let job = Job::with_id((self.next_id)(), job_type, Utc::now());

        match self.jobs.entry(job.id()) {
            Entry::Occupied(_) => Err(CoordinatorError::DuplicateId(job.id())),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(job.clone())));
                debug!(job_id = %job.id(), job_type = %job_type, "job generated");
                Ok(job)
            }
        }
    }

    /// Publish the job to the destination named by its type, then mark it
    /// `Queued` and persist the snapshot.
    ///
    /// A publish failure leaves the job `Created`. A persist failure leaves
    /// the job `Queued` in memory and is returned to the caller. A job that
    /// already reached a terminal state is not published again.
    pub async fn queue_job(&self, job_id: JobId) -> Result<Job> {
        let slot = self.slot(job_id).ok_or(CoordinatorError::NotFound(job_id))?;

        let snapshot = slot.lock().await.clone();
        if snapshot.state().is_terminal() {
            debug!(job_id = %job_id, state = %snapshot.state(), "job already finished, not dispatching");
            return Ok(snapshot);
        }

        let payload = serde_json::to_vec(&snapshot)?;
        self.publisher
            .publish(
                snapshot.job_type(),
                correlation_metadata(job_id),
                payload.into(),
            )
            .await
            .map_err(|source| CoordinatorError::Publish { job_id, source })?;

        let mut job = slot.lock().await;
        match job.mark_queued() {
            Transition::Skipped(state) => {
                // A response won the race against the dispatch confirmation.
                debug!(job_id = %job_id, state = %state, "job advanced while publish was in flight");
                return Ok(job.clone());
            }
            _ => debug!(job_id = %job_id, job_type = %job.job_type(), "job queued"),
        }

        self.persist(&job).await?;
        Ok(job.clone())
    }

    /// Apply the `Complete` transition and persist it.
    pub async fn complete_job(&self, job_id: JobId) -> Result<Job> {
        self.finish(job_id, ResponseOutcome::Success).await
    }

    /// Apply the `Failed` transition and persist it.
    pub async fn fail_job(&self, job_id: JobId) -> Result<Job> {
        self.finish(job_id, ResponseOutcome::Failure).await
    }

    async fn finish(&self, job_id: JobId, outcome: ResponseOutcome) -> Result<Job> {
        let slot = self.slot(job_id).ok_or(CoordinatorError::NotFound(job_id))?;
        let mut job = slot.lock().await;

        let now = Utc::now();
        let transition = match outcome {
            ResponseOutcome::Success => job.complete(now),
            ResponseOutcome::Failure => job.fail(now),
        };

        if let Transition::Overwrote(previous) = transition {
            warn!(
                job_id = %job_id,
                previous = %previous,
                state = %job.state(),
                "job received more than one terminal response"
            );
        } else {
            info!(job_id = %job_id, job_type = %job.job_type(), state = %job.state(), "job finished");
        }

        self.persist(&job).await?;
        Ok(job.clone())
    }

    /// Correlate one inbound message to its job and apply the reported outcome.
    ///
    /// Returns the job's new state, or why the message was discarded. A
    /// persist failure is logged here; the in-memory transition stands.
    pub async fn handle_response(
        &self,
        message: &InboundMessage,
    ) -> std::result::Result<JobState, DiscardReason> {
        let job_id = message.job_id()?;

        if !self.jobs.contains_key(&job_id) {
            return Err(DiscardReason::UnknownJob(job_id));
        }

        let response = message.response()?;
        let outcome = response.outcome()?;

        match self.finish(job_id, outcome).await {
            Ok(job) => Ok(job.state()),
            Err(CoordinatorError::NotFound(id)) => Err(DiscardReason::UnknownJob(id)),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to persist job response");
                self.job(job_id)
                    .await
                    .map(|job| job.state())
                    .ok_or(DiscardReason::UnknownJob(job_id))
            }
        }
    }

    /// Drop terminal jobs that finished more than `retention` ago.
    ///
    /// Jobs whose entry lock is currently held are kept. A retention reaching
    /// past the representable time range keeps every job.
    pub fn evict_finished(&self, retention: Duration) -> usize {
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return 0;
        };

        let evicted = self.evict_where(|job| job.finished_before(cutoff));
        if evicted > 0 {
            debug!(evicted, remaining = self.jobs.len(), "evicted finished jobs");
        }
        evicted
    }

    /// Drop `Created` or `Queued` jobs created more than `max_age` ago.
    ///
    /// These are jobs whose publish kept failing or whose response never
    /// arrived. A response arriving later is discarded as unknown.
    pub fn evict_abandoned(&self, max_age: Duration) -> usize {
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return 0;
        };

        let evicted = self.evict_where(|job| job.pending_since(cutoff));
        if evicted > 0 {
            warn!(evicted, remaining = self.jobs.len(), "evicted jobs that never finished");
        }
        evicted
    }

    fn evict_where(&self, expired: impl Fn(&Job) -> bool) -> usize {
        let before = self.jobs.len();

        self.jobs.retain(|_, slot| match slot.try_lock() {
            Ok(job) => !expired(&job),
            Err(_) => true,
        });

        before.saturating_sub(self.jobs.len())
    }

    /// Current snapshot of one job.
    pub async fn job(&self, job_id: JobId) -> Option<Job> {
        let slot = self.slot(job_id)?;
        let job = slot.lock().await;
        Some(job.clone())
    }

    /// Snapshots of every job in the table.
    pub async fn jobs(&self) -> Vec<Job> {
        let slots: Vec<JobSlot> = self.jobs.iter().map(|e| e.value().clone()).collect();

        let mut jobs = Vec::with_capacity(slots.len());
        for slot in slots {
            jobs.push(slot.lock().await.clone());
        }
        jobs
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.jobs.contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Release the queue and store connections.
    pub(crate) async fn close_adapters(&self) {
        if let Err(e) = self.publisher.close().await {
            warn!(error = %e, "failed to close queue publisher");
        }
        if let Err(e) = self.store.close().await {
            warn!(error = %e, "failed to close state store");
        }
    }

    fn slot(&self, job_id: JobId) -> Option<JobSlot> {
        self.jobs.get(&job_id).map(|entry| entry.value().clone())
    }

    async fn persist(&self, job: &Job) -> Result<()> {
        self.store
            .put(&job.id().to_string(), job)
            .await
            .map_err(|source| CoordinatorError::Persist {
                job_id: job.id(),
                source,
            })
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("job_count", &self.jobs.len())
            .finish()
    }
}
