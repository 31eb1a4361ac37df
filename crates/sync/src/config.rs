//! Engine configuration loaded from environment variables.

use crate::reconnect::ReconnectConfig;

/// Configuration for the synchronization engine.
///
/// All fields have defaults suitable for local development; override
/// via environment variables in production.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// WebSocket base URL (e.g. `ws://localhost:3000`).
    pub ws_url: String,
    /// Job API base URL (e.g. `http://localhost:3000`).
    pub api_url: String,
    /// Handshake bound: connect fails if the server does not
    /// acknowledge the session within this many seconds.
    pub connect_timeout_secs: u64,
    /// Interval between outbound heartbeat pings.
    pub heartbeat_interval_secs: u64,
    /// Fallback poll interval.
    pub poll_interval_secs: u64,
    /// How often the health check considers re-connecting.
    pub health_check_interval_secs: u64,
    /// Bounded reconnection policy.
    pub reconnect: ReconnectConfig,
}

impl SyncConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                  |
    /// |------------------------------|--------------------------|
    /// | `SYNC_WS_URL`                | `ws://localhost:3000`    |
    /// | `SYNC_API_URL`               | `http://localhost:3000`  |
    /// | `SYNC_CONNECT_TIMEOUT_SECS`  | `10`                     |
    /// | `SYNC_HEARTBEAT_SECS`        | `30`                     |
    /// | `SYNC_POLL_INTERVAL_SECS`    | `5`                      |
    /// | `SYNC_HEALTH_CHECK_SECS`     | `30`                     |
    pub fn from_env() -> Self {
        let ws_url = std::env::var("SYNC_WS_URL").unwrap_or_else(|_| "ws://localhost:3000".into());
        let api_url =
            std::env::var("SYNC_API_URL").unwrap_or_else(|_| "http://localhost:3000".into());

        let connect_timeout_secs: u64 = std::env::var("SYNC_CONNECT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("SYNC_CONNECT_TIMEOUT_SECS must be a valid u64");

        let heartbeat_interval_secs: u64 = std::env::var("SYNC_HEARTBEAT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SYNC_HEARTBEAT_SECS must be a valid u64");

        let poll_interval_secs: u64 = std::env::var("SYNC_POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("SYNC_POLL_INTERVAL_SECS must be a valid u64");

        let health_check_interval_secs: u64 = std::env::var("SYNC_HEALTH_CHECK_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SYNC_HEALTH_CHECK_SECS must be a valid u64");

        Self {
            ws_url,
            api_url,
            connect_timeout_secs,
            heartbeat_interval_secs,
            poll_interval_secs,
            health_check_interval_secs,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:3000".into(),
            api_url: "http://localhost:3000".into(),
            connect_timeout_secs: 10,
            heartbeat_interval_secs: 30,
            poll_interval_secs: 5,
            health_check_interval_secs: 30,
            reconnect: ReconnectConfig::default(),
        }
    }
}
