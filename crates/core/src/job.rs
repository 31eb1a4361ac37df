//! Job entity model for the background job engine.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// The fixed set of background job kinds the platform can run.
///
/// Serialized in SCREAMING_SNAKE_CASE to match the wire protocol and
/// the Job API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    GenerateTests,
    RunTests,
    UploadJson,
    OpenReport,
}

/// Lifecycle status of a job.
///
/// `Completed`, `Failed`, and `Stopped` are terminal: once reached, a
/// job never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    /// Whether this status is terminal (no further transitions expected).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

/// A job record as held in the client cache.
///
/// Created from a `job:created` notification or a Job API response and
/// mutated only through pure merges — every update produces a fresh
/// snapshot, so readers holding an old one never observe a torn state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    /// Completion percentage (0-100).
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    /// Opaque result payload; set only on `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error description; set only on `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Who cancelled the job; set only on `Stopped`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<String>,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// Non-null iff `status` is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    pub user_id: String,
    pub username: String,
}

impl Job {
    /// Whether the job has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
