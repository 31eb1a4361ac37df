//! Wire message types and parser for the push channel.
//!
//! The server sends JSON messages with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`ServerMessage`] enum and serializes the
//! client's control messages ([`ClientMessage`]) with the same
//! envelope. Anything that fails to parse is rejected at this boundary
//! so no loosely-typed payload ever reaches the cache.

use serde::{Deserialize, Serialize};
use testlab_core::job::{JobStatus, JobType};
use testlab_core::types::{JobId, Timestamp};

use crate::events::JobEvent;

/// All known inbound message types.
///
/// Deserialized via the internally-tagged `"type"` field with
/// associated `"data"` content.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// Session acknowledgment sent once after a successful connect.
    #[serde(rename = "connected")]
    Connected(ConnectedData),

    /// Server-side error, including an authentication refusal during
    /// the handshake window.
    #[serde(rename = "error")]
    Error(ErrorData),

    /// Heartbeat reply.
    #[serde(rename = "pong")]
    Pong(PongData),

    /// A job record was created.
    #[serde(rename = "job:created")]
    JobCreated(JobCreatedData),

    /// A job began executing.
    #[serde(rename = "job:started")]
    JobStarted(JobStartedData),

    /// Progress update from a running job.
    #[serde(rename = "job:progress")]
    JobProgress(JobProgressData),

    /// A job finished successfully.
    #[serde(rename = "job:completed")]
    JobCompleted(JobCompletedData),

    /// A job failed with an error.
    #[serde(rename = "job:failed")]
    JobFailed(JobFailedData),

    /// A job was cancelled.
    #[serde(rename = "job:stopped")]
    JobStopped(JobStoppedData),
}

/// Payload for `connected` messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedData {
    pub session_id: String,
    pub server_time: Timestamp,
}

/// Payload for `error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub code: String,
    pub message: String,
}

/// Payload for `pong` messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongData {
    pub server_time: Timestamp,
}

/// Payload for `job:created` messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreatedData {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub user_id: String,
    pub username: String,
    pub created_at: Timestamp,
}

/// Payload for `job:started` messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStartedData {
    pub id: JobId,
    pub status: JobStatus,
    pub started_at: Timestamp,
}

/// Payload for `job:progress` messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressData {
    pub id: JobId,
    /// Completion percentage (0-100).
    pub progress: u8,
    /// Optional human-readable progress text. Absent does not mean
    /// "clear" — a recorded message survives a payload without one.
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload for `job:completed` messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCompletedData {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub result_data: serde_json::Value,
    pub completed_at: Timestamp,
    pub duration_ms: i64,
}

/// Payload for `job:failed` messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailedData {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub error_message: String,
    pub completed_at: Timestamp,
}

/// Payload for `job:stopped` messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStoppedData {
    pub id: JobId,
    pub cancelled_by: String,
    pub completed_at: Timestamp,
}

impl ServerMessage {
    /// Convert a lifecycle message into a [`JobEvent`], or `None` for
    /// session-level messages (`connected`, `error`, `pong`).
    pub fn into_job_event(self) -> Option<JobEvent> {
        match self {
            ServerMessage::JobCreated(data) => Some(JobEvent::Created(data)),
            ServerMessage::JobStarted(data) => Some(JobEvent::Started(data)),
            ServerMessage::JobProgress(data) => Some(JobEvent::Progress(data)),
            ServerMessage::JobCompleted(data) => Some(JobEvent::Completed(data)),
            ServerMessage::JobFailed(data) => Some(JobEvent::Failed(data)),
            ServerMessage::JobStopped(data) => Some(JobEvent::Stopped(data)),
            ServerMessage::Connected(_) | ServerMessage::Error(_) | ServerMessage::Pong(_) => None,
        }
    }
}

/// Outbound control messages.
///
/// Serialized with the same `{"type", "data"}` envelope the server
/// uses for notifications.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { room: String },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { room: String },

    #[serde(rename = "ping")]
    Ping,
}

/// Parse an inbound text frame into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log the rejection and continue.
pub fn parse_message(text: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_connected_message() {
        let json = r#"{"type":"connected","data":{"sessionId":"s-1","serverTime":"2026-08-01T10:00:00Z"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ServerMessage::Connected(data) => {
                assert_eq!(data.session_id, "s-1");
            }
            other => panic!("Expected Connected, got {other:?}"),
        }
    }

    #[test]
    fn parse_error_message() {
        let json = r#"{"type":"error","data":{"code":"UNAUTHORIZED","message":"bad token"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ServerMessage::Error(data) => {
                assert_eq!(data.code, "UNAUTHORIZED");
                assert_eq!(data.message, "bad token");
            }
            other => panic!("Expected Error, got {other:?}"),
        }
    }

    #[test]
    fn parse_job_created_message() {
        let json = r#"{"type":"job:created","data":{"id":"j1","type":"RUN_TESTS","status":"PENDING","userId":"u1","username":"alice","createdAt":"2026-08-01T10:00:00Z"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ServerMessage::JobCreated(data) => {
                assert_eq!(data.id, "j1");
                assert_eq!(data.job_type, testlab_core::JobType::RunTests);
                assert_eq!(data.status, testlab_core::JobStatus::Pending);
                assert_eq!(data.username, "alice");
            }
            other => panic!("Expected JobCreated, got {other:?}"),
        }
    }

    #[test]
    fn parse_job_progress_with_message() {
        let json = r#"{"type":"job:progress","data":{"id":"j1","progress":40,"message":"running step 2"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ServerMessage::JobProgress(data) => {
                assert_eq!(data.progress, 40);
                assert_eq!(data.message.as_deref(), Some("running step 2"));
            }
            other => panic!("Expected JobProgress, got {other:?}"),
        }
    }

    #[test]
    fn parse_job_progress_without_message() {
        let json = r#"{"type":"job:progress","data":{"id":"j1","progress":55}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ServerMessage::JobProgress(data) => {
                assert!(data.message.is_none());
            }
            other => panic!("Expected JobProgress, got {other:?}"),
        }
    }

    #[test]
    fn parse_job_completed_message() {
        let json = r#"{"type":"job:completed","data":{"id":"j1","type":"RUN_TESTS","status":"COMPLETED","resultData":{"ok":true},"completedAt":"2026-08-01T10:05:00Z","durationMs":5000}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ServerMessage::JobCompleted(data) => {
                assert_eq!(data.id, "j1");
                assert_eq!(data.result_data["ok"], true);
                assert_eq!(data.duration_ms, 5000);
            }
            other => panic!("Expected JobCompleted, got {other:?}"),
        }
    }

    #[test]
    fn parse_job_failed_message() {
        let json = r#"{"type":"job:failed","data":{"id":"j2","type":"UPLOAD_JSON","status":"FAILED","errorMessage":"schema mismatch","completedAt":"2026-08-01T10:05:00Z"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ServerMessage::JobFailed(data) => {
                assert_eq!(data.error_message, "schema mismatch");
            }
            other => panic!("Expected JobFailed, got {other:?}"),
        }
    }

    #[test]
    fn parse_job_stopped_message() {
        let json = r#"{"type":"job:stopped","data":{"id":"j3","cancelledBy":"alice","completedAt":"2026-08-01T10:05:00Z"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ServerMessage::JobStopped(data) => {
                assert_eq!(data.cancelled_by, "alice");
            }
            other => panic!("Expected JobStopped, got {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_type_returns_error() {
        let json = r#"{"type":"job:exploded","data":{}}"#;
        assert!(parse_message(json).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_message("not json at all").is_err());
    }

    #[test]
    fn parse_missing_required_field_returns_error() {
        // job:created without an id must not produce a partial record.
        let json = r#"{"type":"job:created","data":{"type":"RUN_TESTS","status":"PENDING","userId":"u1","username":"alice","createdAt":"2026-08-01T10:00:00Z"}}"#;
        assert!(parse_message(json).is_err());
    }

    #[test]
    fn session_messages_are_not_job_events() {
        let json = r#"{"type":"pong","data":{"serverTime":"2026-08-01T10:00:00Z"}}"#;
        let msg = parse_message(json).unwrap();
        assert!(msg.into_job_event().is_none());
    }

    #[test]
    fn serialize_subscribe_message() {
        let msg = ClientMessage::Subscribe {
            room: "jobs:all".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"subscribe","data":{"room":"jobs:all"}}"#);
    }

    #[test]
    fn serialize_ping_message() {
        let json = serde_json::to_string(&ClientMessage::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }
}
