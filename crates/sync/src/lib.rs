//! Real-time job synchronization engine.
//!
//! Turns the stream of asynchronous job lifecycle notifications pushed
//! over the WebSocket channel into a consistent, queryable local view
//! of job state: typed message decoding, connection management with
//! bounded reconnection, reference-counted room subscriptions, pure
//! cache merges, per-job observers, and a fallback poller that bounds
//! staleness when notifications are lost.

pub mod api;
pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod events;
pub mod manager;
pub mod messages;
pub mod observer;
pub mod poller;
pub mod reconnect;
pub mod router;
pub mod subscriptions;

pub use auth::{CredentialSource, StaticCredential};
pub use cache::{JobCache, RefreshRequest};
pub use client::ConnectionState;
pub use config::SyncConfig;
pub use events::{JobEvent, SyncEvent};
pub use manager::SyncManager;
pub use observer::JobObserver;
