//! Cache synchronizer: merges lifecycle events into the reactive cache.
//!
//! [`JobCache`] maintains three indices over the same job records —
//! `job-by-id`, `active-job-by-type`, and the newest-first `all-jobs`
//! collection — and keeps them consistent on every merge. All merges
//! are pure: each write computes a fresh snapshot from the previous
//! one, so readers holding an earlier snapshot never observe a torn
//! state.
//!
//! Terminal events treat the point-patch as optimistic and additionally
//! schedule an invalidate-and-refetch of the collection; the refetch
//! reconciles any divergence against the Job API's own records.

use std::sync::Arc;

use testlab_core::job::{Job, JobStatus, JobType};
use testlab_core::types::JobId;
use testlab_store::{ReactiveStore, StoreChange};
use tokio::sync::{broadcast, mpsc};

use crate::events::JobEvent;
use crate::messages::{
    JobCompletedData, JobCreatedData, JobFailedData, JobProgressData, JobStartedData,
    JobStoppedData,
};

/// Key for the singleton `all-jobs` collection entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllJobsKey;

/// A scheduled cache refresh, consumed by the refresher task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRequest {
    /// Refetch the whole job collection (reconciles every index).
    AllJobs,
    /// Refetch the active slot for one job type.
    ActiveForType(JobType),
}

/// The shared reactive cache of job state.
pub struct JobCache {
    by_id: ReactiveStore<JobId, Job>,
    active_by_type: ReactiveStore<JobType, Job>,
    all_jobs: ReactiveStore<AllJobsKey, Vec<Job>>,
    refresh_tx: mpsc::UnboundedSender<RefreshRequest>,
}

impl JobCache {
    /// Create an empty cache plus the receiver half of its refresh queue.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RefreshRequest>) {
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let cache = Arc::new(Self {
            by_id: ReactiveStore::new(),
            active_by_type: ReactiveStore::new(),
            all_jobs: ReactiveStore::new(),
            refresh_tx,
        });
        (cache, refresh_rx)
    }

    // ---- read side ----

    /// Canonical record for a job id.
    pub fn job(&self, id: &str) -> Option<Arc<Job>> {
        self.by_id.get(&id.to_string())
    }

    /// The most recent job of a given type.
    pub fn active_job(&self, job_type: JobType) -> Option<Arc<Job>> {
        self.active_by_type.get(&job_type)
    }

    /// The newest-first job collection, if loaded.
    pub fn all_jobs(&self) -> Option<Arc<Vec<Job>>> {
        self.all_jobs.get(&AllJobsKey)
    }

    /// Change notices for per-job records.
    pub fn subscribe_jobs(&self) -> broadcast::Receiver<StoreChange<JobId>> {
        self.by_id.subscribe()
    }

    /// Change notices for active-job slots.
    pub fn subscribe_active(&self) -> broadcast::Receiver<StoreChange<JobType>> {
        self.active_by_type.subscribe()
    }

    /// Change notices for the collection.
    pub fn subscribe_all_jobs(&self) -> broadcast::Receiver<StoreChange<AllJobsKey>> {
        self.all_jobs.subscribe()
    }

    // ---- write side ----

    /// Merge one lifecycle event into every index.
    ///
    /// Events other than `job:created` referencing an id absent from
    /// the cache are a silent no-op: a partial record is never
    /// synthesized from a non-creation event.
    pub fn apply(&self, event: &JobEvent) {
        match event {
            JobEvent::Created(data) => self.apply_created(data),
            JobEvent::Started(data) => {
                self.apply_patch(&data.id, event.kind(), |prev| merge_started(prev, data));
            }
            JobEvent::Progress(data) => {
                self.apply_patch(&data.id, event.kind(), |prev| merge_progress(prev, data));
            }
            JobEvent::Completed(data) => {
                if self.apply_patch(&data.id, event.kind(), |prev| merge_completed(prev, data)) {
                    self.request_refresh(RefreshRequest::AllJobs);
                }
            }
            JobEvent::Failed(data) => {
                if self.apply_patch(&data.id, event.kind(), |prev| merge_failed(prev, data)) {
                    self.request_refresh(RefreshRequest::AllJobs);
                }
            }
            JobEvent::Stopped(data) => {
                if self.apply_patch(&data.id, event.kind(), |prev| merge_stopped(prev, data)) {
                    self.request_refresh(RefreshRequest::AllJobs);
                }
            }
        }
    }

    /// Merge a full record from the Job API (creation response or a
    /// point fetch) into every index.
    pub fn upsert_record(&self, job: Job) {
        self.by_id.set(job.id.clone(), job.clone());
        self.insert_or_patch_collection(&job);
        self.active_by_type.set(job.job_type, job);
    }

    /// Replace the collection wholesale from a Job API list response.
    ///
    /// Reconciles all three indices: the collection is reordered newest
    /// first, every per-job record is replaced, and each type's active
    /// slot is recomputed. On reconcile the API is the source of truth,
    /// so records are replaced outright here.
    pub fn apply_collection(&self, mut jobs: Vec<Job>) {
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        for job in &jobs {
            self.by_id.set(job.id.clone(), job.clone());
        }

        // Newest job per type becomes the active slot.
        let mut seen_types: Vec<JobType> = Vec::new();
        for job in &jobs {
            if !seen_types.contains(&job.job_type) {
                seen_types.push(job.job_type);
                self.active_by_type.set(job.job_type, job.clone());
            }
        }

        tracing::debug!(count = jobs.len(), "Applied job collection");
        self.all_jobs.set(AllJobsKey, jobs);
    }

    /// Mark the relevant index stale and queue a refetch.
    pub fn request_refresh(&self, request: RefreshRequest) {
        match request {
            RefreshRequest::AllJobs => self.all_jobs.invalidate(&AllJobsKey),
            RefreshRequest::ActiveForType(t) => self.active_by_type.invalidate(&t),
        }
        // A closed queue only means the engine is shutting down.
        if self.refresh_tx.send(request).is_err() {
            tracing::debug!("Refresh queue closed, request dropped");
        }
    }

    // ---- private helpers ----

    /// Insert a fresh record, deduplicating by id.
    ///
    /// `job:created` is the only event permitted to create a cache
    /// entry. The active slot is always repointed at this record.
    fn apply_created(&self, data: &JobCreatedData) {
        let inserted = self.by_id.update(&data.id, |prev| match prev {
            Some(_) => None, // already known — dedupe
            None => Some(job_from_created(data)),
        });

        let record = match self.by_id.get(&data.id) {
            Some(job) => job,
            None => return, // unreachable: just inserted or pre-existing
        };

        if inserted {
            self.insert_or_patch_collection(&record);
        }
        self.active_by_type.set(record.job_type, (*record).clone());
    }

    /// Apply a pure merge to the canonical record and propagate the new
    /// snapshot to the collection entry and the matching active slot.
    ///
    /// Returns whether a new snapshot was published.
    fn apply_patch(
        &self,
        id: &str,
        kind: &'static str,
        merge: impl FnOnce(&Job) -> Option<Job>,
    ) -> bool {
        let id = id.to_string();
        let published = self.by_id.update(&id, |prev| match prev {
            Some(prev) => merge(prev),
            None => {
                tracing::debug!(job_id = %id, kind, "Event for unknown job, ignoring");
                None
            }
        });

        if !published {
            return false;
        }

        if let Some(next) = self.by_id.get(&id) {
            self.patch_collection(&next);
            self.patch_active(&next);
        }
        true
    }

    /// Prepend a record to the collection if absent (newest first).
    fn insert_or_patch_collection(&self, job: &Job) {
        self.all_jobs.update(&AllJobsKey, |prev| match prev {
            Some(list) => {
                let mut next: Vec<Job> = Vec::with_capacity(list.len() + 1);
                let mut replaced = false;
                for entry in list {
                    if entry.id == job.id {
                        next.push(job.clone());
                        replaced = true;
                    } else {
                        next.push(entry.clone());
                    }
                }
                if !replaced {
                    next.insert(0, job.clone());
                }
                Some(next)
            }
            None => Some(vec![job.clone()]),
        });
    }

    /// Replace the matching collection entry with the new snapshot.
    fn patch_collection(&self, next: &Job) {
        self.all_jobs.update(&AllJobsKey, |prev| {
            let list = prev?;
            if !list.iter().any(|j| j.id == next.id) {
                return None;
            }
            Some(
                list.iter()
                    .map(|j| if j.id == next.id { next.clone() } else { j.clone() })
                    .collect(),
            )
        });
    }

    /// Replace the active slot when its id matches the patched record.
    fn patch_active(&self, next: &Job) {
        self.active_by_type.update(&next.job_type, |prev| match prev {
            Some(active) if active.id == next.id => Some(next.clone()),
            _ => None,
        });
    }
}

// ---- pure merge functions ----

/// Build a fresh record from a `job:created` payload.
fn job_from_created(data: &JobCreatedData) -> Job {
    Job {
        id: data.id.clone(),
        job_type: data.job_type,
        status: data.status,
        progress: 0,
        progress_message: None,
        result: None,
        error: None,
        cancelled_by: None,
        created_at: data.created_at,
        started_at: None,
        completed_at: None,
        user_id: data.user_id.clone(),
        username: data.username.clone(),
    }
}

/// `job:started`: status becomes RUNNING, startedAt is recorded.
///
/// A terminal record is never moved back — status transitions are
/// monotonic under the at-least-once, out-of-order channel.
fn merge_started(prev: &Job, data: &JobStartedData) -> Option<Job> {
    if prev.status.is_terminal() {
        return None;
    }
    let mut next = prev.clone();
    next.status = JobStatus::Running;
    next.started_at = Some(data.started_at);
    Some(next)
}

/// `job:progress`: progress and, when present, the message.
///
/// An absent message never erases a recorded one — merges fill or
/// advance, they do not blank present fields.
fn merge_progress(prev: &Job, data: &JobProgressData) -> Option<Job> {
    if prev.status.is_terminal() {
        return None;
    }
    let mut next = prev.clone();
    next.progress = data.progress.min(100);
    if let Some(message) = &data.message {
        next.progress_message = Some(message.clone());
    }
    Some(next)
}

/// `job:completed`: terminal patch with result and forced 100%.
fn merge_completed(prev: &Job, data: &JobCompletedData) -> Option<Job> {
    if prev.status.is_terminal() {
        return None;
    }
    let mut next = prev.clone();
    next.status = JobStatus::Completed;
    next.progress = 100;
    next.result = Some(data.result_data.clone());
    next.completed_at = Some(data.completed_at);
    Some(next)
}

/// `job:failed`: terminal patch with the error description.
fn merge_failed(prev: &Job, data: &JobFailedData) -> Option<Job> {
    if prev.status.is_terminal() {
        return None;
    }
    let mut next = prev.clone();
    next.status = JobStatus::Failed;
    next.error = Some(data.error_message.clone());
    next.completed_at = Some(data.completed_at);
    Some(next)
}

/// `job:stopped`: terminal patch with cancellation attribution.
fn merge_stopped(prev: &Job, data: &JobStoppedData) -> Option<Job> {
    if prev.status.is_terminal() {
        return None;
    }
    let mut next = prev.clone();
    next.status = JobStatus::Stopped;
    next.cancelled_by = Some(data.cancelled_by.clone());
    next.completed_at = Some(data.completed_at);
    Some(next)
}
