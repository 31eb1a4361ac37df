//! Bounded exponential-backoff reconnection for the push channel.
//!
//! When the connection drops, the connection loop calls
//! [`reconnect_loop`] to retry with increasing delays. Unlike a
//! retry-forever policy, the attempt count is capped: after exhausting
//! it the engine settles at disconnected and leaves recovery to the
//! health check or a manual reconnect.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::auth::CredentialSource;
use crate::client::{SocketClient, SocketConnection};
use crate::events::SyncEvent;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Maximum number of attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 10,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// How a reconnection round ended.
#[derive(Debug)]
pub enum ReconnectOutcome {
    /// A connection was re-established.
    Connected(SocketConnection),
    /// The cancellation token fired.
    Cancelled,
    /// Every attempt failed; the caller should settle at disconnected.
    Exhausted,
    /// The server rejected the credential — retrying cannot help.
    AuthFailed { code: String, message: String },
    /// The credential source no longer has a token (logged out).
    NoCredential,
}

/// Attempt to reconnect with bounded exponential backoff.
///
/// The bearer token is re-read from `credentials` on every attempt so a
/// refreshed token is picked up mid-round. Each attempt is announced as
/// [`SyncEvent::Reconnecting`]; exhaustion emits
/// [`SyncEvent::ReconnectFailed`].
pub async fn reconnect_loop(
    client: &SocketClient,
    credentials: &dyn CredentialSource,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
    event_tx: &broadcast::Sender<SyncEvent>,
) -> ReconnectOutcome {
    let mut delay = config.initial_delay;

    for attempt in 1..=config.max_attempts {
        if cancel.is_cancelled() {
            return ReconnectOutcome::Cancelled;
        }

        let Some(token) = credentials.bearer() else {
            tracing::warn!("No credential available, abandoning reconnect");
            return ReconnectOutcome::NoCredential;
        };

        tracing::info!(
            attempt,
            max_attempts = config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to push channel",
        );
        let _ = event_tx.send(SyncEvent::Reconnecting { attempt });

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reconnect cancelled");
                return ReconnectOutcome::Cancelled;
            }
            result = client.connect(&token) => {
                match result {
                    Ok(conn) => {
                        tracing::info!(attempt, "Reconnected to push channel");
                        return ReconnectOutcome::Connected(conn);
                    }
                    Err(crate::client::ConnectError::Auth { code, message }) => {
                        tracing::error!(code = %code, message = %message, "Credential rejected, abandoning reconnect");
                        return ReconnectOutcome::AuthFailed { code, message };
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Reconnect attempt {attempt} failed");
                    }
                }
            }
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return ReconnectOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }

    tracing::warn!(
        max_attempts = config.max_attempts,
        "Reconnect attempts exhausted",
    );
    let _ = event_tx.send(SyncEvent::ReconnectFailed);
    ReconnectOutcome::Exhausted
}
