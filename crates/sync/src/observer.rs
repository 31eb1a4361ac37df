//! Per-job observer: a narrow, consumer-scoped subscription.
//!
//! UI elements that track exactly one job (a progress indicator, a
//! result panel) hold a [`JobObserver`]. Construction subscribes the
//! job's room; dropping the observer aborts its event task and releases
//! the room — the subscription's lifetime is strictly the observer's
//! lifetime, on every exit path.

use std::sync::Arc;

use testlab_core::job::JobStatus;
use testlab_core::rooms::Room;
use testlab_core::types::JobId;
use tokio::sync::{broadcast, watch};

use crate::events::{JobEvent, SyncEvent};
use crate::subscriptions::SubscriptionRegistry;

/// Independent local state machine for one observed job.
///
/// Seeded to PENDING and updated in place by lifecycle events. The
/// derived predicates are computed from the current status, never
/// cached separately, so they cannot diverge from it.
#[derive(Debug, Clone)]
pub struct JobProgressState {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub progress_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub cancelled_by: Option<String>,
}

impl JobProgressState {
    /// Fresh state for a job, seeded to PENDING.
    pub fn seeded(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            progress: 0,
            progress_message: None,
            result: None,
            error: None,
            cancelled_by: None,
        }
    }

    /// Apply one lifecycle event in place.
    ///
    /// Events for a different job id are ignored — the per-job room is
    /// coarse enough that a brief window around subscribe/unsubscribe
    /// may deliver a neighbour's events.
    pub fn apply(&mut self, event: &JobEvent) {
        if event.job_id() != self.job_id {
            return;
        }
        match event {
            JobEvent::Created(data) => {
                self.status = data.status;
            }
            JobEvent::Started(_) => {
                self.status = JobStatus::Running;
            }
            JobEvent::Progress(data) => {
                self.progress = data.progress.min(100);
                if let Some(message) = &data.message {
                    self.progress_message = Some(message.clone());
                }
            }
            JobEvent::Completed(data) => {
                self.status = JobStatus::Completed;
                self.progress = 100;
                self.result = Some(data.result_data.clone());
            }
            JobEvent::Failed(data) => {
                self.status = JobStatus::Failed;
                self.error = Some(data.error_message.clone());
            }
            JobEvent::Stopped(data) => {
                self.status = JobStatus::Stopped;
                self.cancelled_by = Some(data.cancelled_by.clone());
            }
        }
    }

    /// Reseed to PENDING, optionally rebinding to a new job id.
    pub fn reset(&mut self, job_id: Option<JobId>) {
        let id = job_id.unwrap_or_else(|| self.job_id.clone());
        *self = Self::seeded(id);
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    pub fn is_stopped(&self) -> bool {
        self.status == JobStatus::Stopped
    }
}

/// Tracks one job's lifecycle over the push channel.
///
/// Created via
/// [`SyncManager::observe_job`](crate::manager::SyncManager::observe_job).
pub struct JobObserver {
    job_id: JobId,
    registry: Arc<SubscriptionRegistry>,
    state_tx: watch::Sender<JobProgressState>,
    task: tokio::task::JoinHandle<()>,
}

impl JobObserver {
    /// Subscribe the job's room and start tracking its events.
    ///
    /// Usually constructed via
    /// [`SyncManager::observe_job`](crate::manager::SyncManager::observe_job),
    /// which supplies the engine's registry and event channel.
    pub fn new(
        job_id: JobId,
        registry: Arc<SubscriptionRegistry>,
        mut events: broadcast::Receiver<SyncEvent>,
    ) -> Self {
        registry.subscribe(Room::Job(job_id.clone()));

        let (state_tx, _) = watch::channel(JobProgressState::seeded(job_id.clone()));

        let task_tx = state_tx.clone();
        let task_id = job_id.clone();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SyncEvent::Job(event)) => {
                        if event.job_id() != task_id {
                            continue;
                        }
                        task_tx.send_modify(|state| state.apply(&event));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(job_id = %task_id, skipped, "Observer lagged behind events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            job_id,
            registry,
            state_tx,
            task,
        }
    }

    /// The observed job id.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Snapshot of the current state machine.
    pub fn state(&self) -> JobProgressState {
        self.state_tx.borrow().clone()
    }

    /// Watch channel following every state change.
    pub fn watch(&self) -> watch::Receiver<JobProgressState> {
        self.state_tx.subscribe()
    }

    /// Reseed the local state machine to PENDING.
    ///
    /// For callers that reuse the observer's slot across jobs; the room
    /// subscription stays bound to the original id.
    pub fn reset_state(&self) {
        self.state_tx.send_modify(|state| state.reset(None));
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn is_completed(&self) -> bool {
        self.state().is_completed()
    }

    pub fn is_failed(&self) -> bool {
        self.state().is_failed()
    }

    pub fn is_stopped(&self) -> bool {
        self.state().is_stopped()
    }
}

impl Drop for JobObserver {
    fn drop(&mut self) {
        // Detach the local callback first, then release the room. A
        // late event arriving in between has nothing left to invoke.
        self.task.abort();
        self.registry.unsubscribe(&Room::Job(self.job_id.clone()));
    }
}
