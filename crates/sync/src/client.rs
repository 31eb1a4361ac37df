//! WebSocket client for the push channel.
//!
//! [`SocketClient`] holds the connection configuration. Call
//! [`SocketClient::connect`] with the current bearer token to establish
//! a live [`SocketConnection`]; the call resolves only once the server
//! acknowledges the session and is bounded by the configured timeout.

use std::time::Duration;

use futures::StreamExt;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::messages::{parse_message, ServerMessage};

/// The underlying WebSocket stream type.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connectivity state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Configuration handle for the push channel endpoint.
pub struct SocketClient {
    ws_url: String,
    connect_timeout: Duration,
}

/// A live, server-acknowledged connection.
#[derive(Debug)]
pub struct SocketConnection {
    /// Server-assigned session identifier from the `connected` ack.
    pub session_id: String,
    /// Unique client ID sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: WsStream,
}

/// Errors that can occur while establishing a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The server refused the credential. Terminal for this attempt —
    /// retrying with the same token cannot succeed.
    #[error("Authentication rejected ({code}): {message}")]
    Auth { code: String, message: String },

    /// No handshake acknowledgment arrived within the configured bound.
    #[error("Connection attempt timed out")]
    Timeout,

    /// The connection closed before the server acknowledged the session.
    #[error("Connection closed during handshake")]
    Closed,

    /// A network-level failure. Transient; retried per policy.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ConnectError {
    /// Whether this failure is terminal for the current credential.
    pub fn is_auth(&self) -> bool {
        matches!(self, ConnectError::Auth { .. })
    }
}

impl SocketClient {
    /// Create a new client targeting the push channel endpoint.
    ///
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:3000`.
    pub fn new(ws_url: String, connect_timeout: Duration) -> Self {
        Self {
            ws_url,
            connect_timeout,
        }
    }

    /// WebSocket base URL.
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Connect to the push channel and wait for the session ack.
    ///
    /// The bearer token travels as a connection query parameter — the
    /// transport authenticates at connect time, not per message. A
    /// unique `clientId` (UUID v4) is appended so the server can
    /// address frames back to this specific client.
    pub async fn connect(&self, token: &str) -> Result<SocketConnection, ConnectError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let url = format!("{}/ws?clientId={}&token={}", self.ws_url, client_id, token);

        let handshake = async {
            let (ws_stream, _response) = connect_async(&url).await.map_err(classify_dial_error)?;
            await_session_ack(ws_stream).await
        };

        let (session_id, ws_stream) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| ConnectError::Timeout)??;

        tracing::info!(
            session_id = %session_id,
            client_id = %client_id,
            "Connected to push channel at {}",
            self.ws_url,
        );

        Ok(SocketConnection {
            session_id,
            client_id,
            ws_stream,
        })
    }
}

/// Wait for the server's `connected` acknowledgment.
///
/// An `error` frame arriving before the ack is the server refusing the
/// session — surfaced as an authentication failure. Unknown frames in
/// the handshake window are skipped.
async fn await_session_ack(mut ws_stream: WsStream) -> Result<(String, WsStream), ConnectError> {
    while let Some(frame) = ws_stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match parse_message(&text) {
                Ok(ServerMessage::Connected(data)) => {
                    return Ok((data.session_id, ws_stream));
                }
                Ok(ServerMessage::Error(data)) => {
                    return Err(ConnectError::Auth {
                        code: data.code,
                        message: data.message,
                    });
                }
                Ok(other) => {
                    tracing::debug!(?other, "Frame before session ack, skipping");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Unparseable frame during handshake, skipping");
                }
            },
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "Channel closed during handshake");
                return Err(ConnectError::Closed);
            }
            Ok(_) => {}
            Err(e) => {
                return Err(ConnectError::Transport(e.to_string()));
            }
        }
    }
    Err(ConnectError::Closed)
}

/// Classify a WebSocket dial failure.
///
/// An HTTP 401/403 during the upgrade is the server rejecting the
/// credential; everything else is a transient transport failure.
fn classify_dial_error(e: tungstenite::Error) -> ConnectError {
    match e {
        tungstenite::Error::Http(response)
            if response.status().as_u16() == 401 || response.status().as_u16() == 403 =>
        {
            ConnectError::Auth {
                code: response.status().as_u16().to_string(),
                message: "Credential rejected during upgrade".into(),
            }
        }
        other => ConnectError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_terminal() {
        let err = ConnectError::Auth {
            code: "UNAUTHORIZED".into(),
            message: "bad token".into(),
        };
        assert!(err.is_auth());
        assert!(!ConnectError::Timeout.is_auth());
        assert!(!ConnectError::Transport("refused".into()).is_auth());
    }

    #[tokio::test]
    async fn connect_to_unreachable_host_is_transport_error() {
        // Port 9 (discard) is not listening in the test environment.
        let client = SocketClient::new("ws://127.0.0.1:9".into(), Duration::from_secs(2));
        let result = client.connect("some-token").await;
        match result {
            Err(ConnectError::Transport(_)) | Err(ConnectError::Timeout) => {}
            other => panic!("Expected transport failure, got {other:?}"),
        }
    }
}
