//! Engine-level events emitted by the synchronization engine.
//!
//! Produced by the read loop and the connection machinery after
//! interpreting raw wire messages. Broadcast via a
//! [`tokio::sync::broadcast`] channel; call
//! [`SyncManager::subscribe_events`](crate::manager::SyncManager::subscribe_events)
//! to receive them. Every subscriber gets an independent receiver, so
//! any number of listeners compose without overwriting each other.

use crate::messages::{
    JobCompletedData, JobCreatedData, JobFailedData, JobProgressData, JobStartedData,
    JobStoppedData,
};

/// A decoded job lifecycle notification.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Created(JobCreatedData),
    Started(JobStartedData),
    Progress(JobProgressData),
    Completed(JobCompletedData),
    Failed(JobFailedData),
    Stopped(JobStoppedData),
}

impl JobEvent {
    /// The id of the job this event refers to.
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Created(d) => &d.id,
            JobEvent::Started(d) => &d.id,
            JobEvent::Progress(d) => &d.id,
            JobEvent::Completed(d) => &d.id,
            JobEvent::Failed(d) => &d.id,
            JobEvent::Stopped(d) => &d.id,
        }
    }

    /// Short kind name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Created(_) => "job:created",
            JobEvent::Started(_) => "job:started",
            JobEvent::Progress(_) => "job:progress",
            JobEvent::Completed(_) => "job:completed",
            JobEvent::Failed(_) => "job:failed",
            JobEvent::Stopped(_) => "job:stopped",
        }
    }
}

/// An event originating from the synchronization engine.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The channel is connected and the server acknowledged the session.
    ChannelConnected { session_id: String },

    /// The channel dropped.
    ChannelDisconnected,

    /// A reconnection attempt is starting.
    Reconnecting { attempt: u32 },

    /// The bounded reconnection policy was exhausted without success.
    ReconnectFailed,

    /// A job lifecycle notification was received and merged.
    Job(JobEvent),
}
