//! Inbound message processing loop.
//!
//! The single point where lifecycle notifications are received. Reads
//! raw frames from the push channel, decodes them through the tagged
//! [`ServerMessage`] enum, and fans each job event out to the cache
//! synchronizer (always) and to the engine's broadcast channel (any
//! number of independent listeners).
//!
//! No notification is allowed to escape this loop as an error: a
//! malformed payload is logged and dropped so one bad frame cannot
//! disable delivery of the ones after it.

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::cache::JobCache;
use crate::events::SyncEvent;
use crate::messages::{parse_message, ServerMessage};

/// Process inbound frames until the connection drops.
///
/// Loops until the WebSocket closes, hits a fatal receive error, or the
/// stream is exhausted. Ping/Pong control frames are handled by the
/// transport.
pub async fn run_read_loop<S>(
    stream: &mut S,
    cache: &JobCache,
    event_tx: &broadcast::Sender<SyncEvent>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                dispatch_text(&text, cache, event_tx);
            }
            Ok(Message::Binary(_)) => {
                tracing::trace!("Ignoring binary frame");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "Push channel closed");
                break;
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::error!(error = %e, "Push channel receive error");
                break;
            }
        }
    }
}

/// Decode one text frame and dispatch it.
fn dispatch_text(text: &str, cache: &JobCache, event_tx: &broadcast::Sender<SyncEvent>) {
    match parse_message(text) {
        Ok(ServerMessage::Connected(data)) => {
            // The ack is consumed during the handshake; a repeat is
            // informational only.
            tracing::debug!(session_id = %data.session_id, "Duplicate session ack");
        }
        Ok(ServerMessage::Pong(data)) => {
            tracing::trace!(server_time = %data.server_time, "Heartbeat pong");
        }
        Ok(ServerMessage::Error(data)) => {
            tracing::warn!(code = %data.code, message = %data.message, "Server error frame");
        }
        Ok(message) => {
            if let Some(event) = message.into_job_event() {
                tracing::debug!(job_id = %event.job_id(), kind = event.kind(), "Job event");
                cache.apply(&event);
                // SendError only means no listener is currently attached.
                let _ = event_tx.send(SyncEvent::Job(event));
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, raw_message = %text, "Dropping unparseable frame");
        }
    }
}
