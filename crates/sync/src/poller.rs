//! Fallback poller: scheduled reconciliation for lost notifications.
//!
//! The push channel offers no delivery guarantee. This task inspects
//! the cached collection on a fixed interval and, when unresolved jobs
//! remain, forces an invalidate-and-refetch — bounding worst-case
//! staleness to one poll interval. When everything is terminal (or
//! nothing is cached) a tick performs no network action, so load is
//! proportional to outstanding work.
//!
//! Runs until the cancellation token is triggered; the task's lifetime
//! is tied to the session, never a bare uncancelled timer.

use std::sync::Arc;
use std::time::Duration;

use testlab_core::job::{Job, JobType};
use tokio_util::sync::CancellationToken;

use crate::cache::{JobCache, RefreshRequest};

/// Run the fallback polling loop.
pub async fn run(cache: Arc<JobCache>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        "Fallback poller started"
    );

    let mut ticker = tokio::time::interval(interval);
    // The immediate first tick would race the initial load.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Fallback poller stopping");
                break;
            }
            _ = ticker.tick() => {
                let scheduled = poll_once(&cache);
                if scheduled > 0 {
                    tracing::debug!(scheduled, "Fallback poll scheduled refreshes");
                }
            }
        }
    }
}

/// Inspect the collection snapshot and schedule refreshes as needed.
///
/// Returns the number of refresh requests scheduled — zero when every
/// cached job is terminal or the collection is empty/unloaded.
pub fn poll_once(cache: &JobCache) -> usize {
    let snapshot = match cache.all_jobs() {
        Some(jobs) => jobs,
        None => return 0,
    };

    let types = non_terminal_types(&snapshot);
    if types.is_empty() {
        return 0;
    }

    cache.request_refresh(RefreshRequest::AllJobs);
    for job_type in &types {
        cache.request_refresh(RefreshRequest::ActiveForType(*job_type));
    }
    1 + types.len()
}

/// Distinct job types among non-terminal entries, in first-seen order.
fn non_terminal_types(jobs: &[Job]) -> Vec<JobType> {
    let mut types = Vec::new();
    for job in jobs {
        if !job.is_terminal() && !types.contains(&job.job_type) {
            types.push(job.job_type);
        }
    }
    types
}

#[cfg(test)]
mod tests {
    use super::*;
    use testlab_core::job::JobStatus;

    fn job(id: &str, job_type: JobType, status: JobStatus) -> Job {
        Job {
            id: id.into(),
            job_type,
            status,
            progress: 0,
            progress_message: None,
            result: None,
            error: None,
            cancelled_by: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            user_id: "u1".into(),
            username: "u1".into(),
        }
    }

    #[test]
    fn non_terminal_types_are_distinct_and_ordered() {
        let jobs = vec![
            job("a", JobType::RunTests, JobStatus::Running),
            job("b", JobType::RunTests, JobStatus::Pending),
            job("c", JobType::GenerateTests, JobStatus::Completed),
            job("d", JobType::UploadJson, JobStatus::Pending),
        ];
        assert_eq!(
            non_terminal_types(&jobs),
            vec![JobType::RunTests, JobType::UploadJson]
        );
    }

    #[test]
    fn empty_collection_has_no_types() {
        assert!(non_terminal_types(&[]).is_empty());
    }

    #[test]
    fn tick_with_unloaded_collection_schedules_nothing() {
        let (cache, mut refresh_rx) = JobCache::new();
        assert_eq!(poll_once(&cache), 0);
        assert!(refresh_rx.try_recv().is_err());
    }

    #[test]
    fn tick_with_only_terminal_jobs_schedules_nothing() {
        let (cache, mut refresh_rx) = JobCache::new();
        cache.apply_collection(vec![
            job("a", JobType::RunTests, JobStatus::Completed),
            job("b", JobType::UploadJson, JobStatus::Failed),
        ]);

        assert_eq!(poll_once(&cache), 0);
        assert!(refresh_rx.try_recv().is_err());
    }

    #[test]
    fn tick_with_unresolved_jobs_schedules_one_cycle() {
        let (cache, mut refresh_rx) = JobCache::new();
        cache.apply_collection(vec![
            job("a", JobType::RunTests, JobStatus::Running),
            job("b", JobType::RunTests, JobStatus::Pending),
            job("c", JobType::GenerateTests, JobStatus::Completed),
        ]);

        let scheduled = poll_once(&cache);
        assert_eq!(scheduled, 2); // collection + one distinct type

        assert_eq!(refresh_rx.try_recv().unwrap(), RefreshRequest::AllJobs);
        assert_eq!(
            refresh_rx.try_recv().unwrap(),
            RefreshRequest::ActiveForType(JobType::RunTests)
        );
        assert!(refresh_rx.try_recv().is_err());
    }
}
