//! Session orchestration for the synchronization engine.
//!
//! [`SyncManager`] owns the whole component set: it spawns the
//! connection loop (connect → per-connection init → read loop →
//! reconnect), the fallback poller, the cache refresher, and the
//! health check, and exposes the read surface consumers need (cache,
//! events, connectivity state, per-job observers).
//!
//! Created once per authenticated session via [`SyncManager::start`];
//! the returned `Arc` can be cheaply cloned into consumers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use testlab_core::job::{Job, JobType};
use testlab_core::rooms::Room;
use testlab_core::types::JobId;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::api::{JobApi, JobApiError};
use crate::auth::{subject_from_bearer, CredentialSource};
use crate::cache::{JobCache, RefreshRequest};
use crate::client::{ConnectionState, SocketClient, SocketConnection};
use crate::config::SyncConfig;
use crate::events::SyncEvent;
use crate::messages::ClientMessage;
use crate::observer::JobObserver;
use crate::poller;
use crate::reconnect::{reconnect_loop, ReconnectOutcome};
use crate::router;
use crate::subscriptions::SubscriptionRegistry;

/// Broadcast channel capacity for engine events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for each background task.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Orchestrates the push channel, the cache, and the background tasks.
pub struct SyncManager {
    config: SyncConfig,
    credentials: Arc<dyn CredentialSource>,
    cache: Arc<JobCache>,
    registry: Arc<SubscriptionRegistry>,
    api: Arc<JobApi>,
    event_tx: broadcast::Sender<SyncEvent>,
    state_tx: watch::Sender<ConnectionState>,
    /// Master cancellation token — cancelled during shutdown.
    cancel: CancellationToken,
    /// Signalled by the health check or a manual reconnect request.
    retry: Notify,
    /// The per-user room currently held, derived from the credential's
    /// subject claim at connect time.
    user_room: Mutex<Option<Room>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl SyncManager {
    /// Start the engine and all of its background tasks.
    ///
    /// Returns a shared handle. The cache is primed with an initial
    /// collection fetch; the connection loop begins dialing
    /// immediately if a credential is available.
    pub fn start(config: SyncConfig, credentials: Arc<dyn CredentialSource>) -> Arc<Self> {
        let (cache, refresh_rx) = JobCache::new();
        let registry = Arc::new(SubscriptionRegistry::new());
        // Base interest held for the whole session.
        registry.subscribe(Room::AllJobs);

        let api = Arc::new(JobApi::new(config.api_url.clone(), Arc::clone(&credentials)));
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let poll_interval = Duration::from_secs(config.poll_interval_secs);

        let manager = Arc::new(Self {
            config,
            credentials,
            cache,
            registry,
            api,
            event_tx,
            state_tx,
            cancel: CancellationToken::new(),
            retry: Notify::new(),
            user_room: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });

        let tasks = vec![
            tokio::spawn(run_connection_loop(Arc::clone(&manager))),
            tokio::spawn(run_refresher(
                Arc::clone(&manager.api),
                Arc::clone(&manager.cache),
                refresh_rx,
                manager.cancel.child_token(),
            )),
            tokio::spawn(poller::run(
                Arc::clone(&manager.cache),
                poll_interval,
                manager.cancel.child_token(),
            )),
            tokio::spawn(run_health_check(Arc::clone(&manager))),
        ];
        *manager.tasks.lock().expect("manager lock poisoned") = tasks;

        // Initial load: the collection is merged wholesale on arrival.
        manager.cache.request_refresh(RefreshRequest::AllJobs);

        manager
    }

    // ---- read surface ----

    /// The shared reactive cache.
    pub fn cache(&self) -> &Arc<JobCache> {
        &self.cache
    }

    /// The room subscription registry.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Subscribe to engine events. Every call yields an independent
    /// receiver; listeners compose instead of overwriting each other.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Watch the three-value connectivity state.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Synchronous connectivity snapshot.
    pub fn is_connected(&self) -> bool {
        *self.state_tx.borrow() == ConnectionState::Connected
    }

    /// Track a single job's lifecycle. The room subscription is held
    /// for exactly as long as the returned observer lives.
    pub fn observe_job(&self, job_id: impl Into<JobId>) -> JobObserver {
        JobObserver::new(
            job_id.into(),
            Arc::clone(&self.registry),
            self.event_tx.subscribe(),
        )
    }

    // ---- imperative surface ----

    /// Launch a job and merge the creation response into the cache.
    pub async fn create_job(
        &self,
        job_type: JobType,
        parameters: serde_json::Value,
    ) -> Result<Job, JobApiError> {
        let job = self.api.create_job(job_type, &parameters).await?;
        self.cache.upsert_record(job.clone());
        Ok(job)
    }

    /// Ask the server to cancel a job. The resulting `job:stopped`
    /// notification (or the next refetch) updates the cache.
    pub async fn cancel_job(&self, job_id: &str) -> Result<(), JobApiError> {
        self.api.cancel_job(job_id).await
    }

    /// Force a collection refetch now.
    pub fn refresh_jobs(&self) {
        self.cache.request_refresh(RefreshRequest::AllJobs);
    }

    /// Request a reconnect attempt if the channel is down.
    pub fn reconnect_now(&self) {
        self.retry.notify_one();
    }

    /// Gracefully stop every background task and settle disconnected.
    /// Idempotent.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down sync engine");
        self.cancel.cancel();

        let tasks: Vec<_> = {
            let mut held = self.tasks.lock().expect("manager lock poisoned");
            held.drain(..).collect()
        };
        for task in tasks {
            let _ = tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, task).await;
        }

        self.registry.detach();
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Sync engine shut down complete");
    }

    // ---- private helpers ----

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Derive the per-user room from the credential's subject claim and
    /// reconcile it against the one currently held.
    ///
    /// The subject comes from the token itself — never from a locally
    /// cached user id, which may originate from a different identity
    /// source than the one the server addresses rooms by.
    fn reconcile_user_room(&self) {
        let subject = self.credentials.bearer().and_then(|token| {
            match subject_from_bearer(&token) {
                Ok(subject) => Some(subject),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not extract subject from credential");
                    None
                }
            }
        });
        let next = subject.map(Room::User);

        let mut current = self.user_room.lock().expect("manager lock poisoned");
        if *current == next {
            return;
        }
        if let Some(stale) = current.take() {
            self.registry.unsubscribe(&stale);
        }
        if let Some(room) = next.clone() {
            self.registry.subscribe(room);
        }
        *current = next;
    }

    /// Run one connection's lifetime: per-connection initialization,
    /// the read loop, and the teardown that resets it all.
    async fn run_session(&self, conn: SocketConnection) {
        let SocketConnection {
            session_id,
            client_id,
            ws_stream,
        } = conn;
        let session_cancel = self.cancel.child_token();

        // Per-connection initialization: entered exactly once per
        // connection lifetime, undone below when the channel drops.
        let (control_tx, mut control_rx) = mpsc::unbounded_channel::<ClientMessage>();
        self.reconcile_user_room();
        self.registry.attach(control_tx.clone());

        let (mut sink, mut stream) = ws_stream.split();

        // Sender task: forward control messages to the WebSocket sink.
        let send_cancel = session_cancel.clone();
        let send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = send_cancel.cancelled() => break,
                    msg = control_rx.recv() => {
                        let Some(msg) = msg else { break };
                        let text = match serde_json::to_string(&msg) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to encode control message");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(text)).await.is_err() {
                            tracing::debug!("Push channel sink closed");
                            break;
                        }
                    }
                }
            }
        });

        // Heartbeat task: periodic ping so both ends can detect a
        // half-dead channel.
        let heartbeat_cancel = session_cancel.clone();
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval_secs);
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            // The connect handshake already proved liveness.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = heartbeat_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if control_tx.send(ClientMessage::Ping).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Topic membership is not preserved by the transport across
        // reconnects — re-issue every held room.
        self.registry.resubscribe_all();

        self.set_state(ConnectionState::Connected);
        let _ = self.event_tx.send(SyncEvent::ChannelConnected {
            session_id: session_id.clone(),
        });
        tracing::info!(session_id = %session_id, client_id = %client_id, "Session established");

        tokio::select! {
            _ = router::run_read_loop(&mut stream, &self.cache, &self.event_tx) => {}
            _ = session_cancel.cancelled() => {}
        }

        // Teardown: reset the per-connection wiring.
        session_cancel.cancel();
        self.registry.detach();
        let _ = tokio::time::timeout(Duration::from_secs(1), send_task).await;
        heartbeat_task.abort();
        self.set_state(ConnectionState::Disconnected);
        let _ = self.event_tx.send(SyncEvent::ChannelDisconnected);
        tracing::info!(session_id = %session_id, "Session ended");
    }

    /// Try to obtain a connection, applying the reconnect policy to
    /// transient failures. Authentication failure is terminal for the
    /// attempt and is never retried automatically.
    async fn establish(&self, client: &SocketClient) -> Established {
        let Some(token) = self.credentials.bearer() else {
            tracing::warn!("No credential available, staying disconnected");
            return Established::GaveUp;
        };

        self.set_state(ConnectionState::Connecting);
        match client.connect(&token).await {
            Ok(conn) => Established::Session(conn),
            Err(e) if e.is_auth() => {
                tracing::error!(error = %e, "Authentication failed, not retrying");
                Established::GaveUp
            }
            Err(e) => {
                tracing::warn!(error = %e, "Connect failed, entering reconnect loop");
                let outcome = reconnect_loop(
                    client,
                    self.credentials.as_ref(),
                    &self.config.reconnect,
                    &self.cancel,
                    &self.event_tx,
                )
                .await;
                match outcome {
                    ReconnectOutcome::Connected(conn) => Established::Session(conn),
                    ReconnectOutcome::Cancelled => Established::Cancelled,
                    ReconnectOutcome::AuthFailed { code, message } => {
                        tracing::error!(code = %code, message = %message, "Authentication failed, not retrying");
                        Established::GaveUp
                    }
                    ReconnectOutcome::Exhausted | ReconnectOutcome::NoCredential => {
                        Established::GaveUp
                    }
                }
            }
        }
    }
}

/// Outcome of one [`SyncManager::establish`] round.
enum Established {
    Session(SocketConnection),
    GaveUp,
    Cancelled,
}

/// Core connection loop: connect → session → reconnect.
///
/// When a round gives up (auth failure, exhausted retries, missing
/// credential) the state settles at disconnected until the health
/// check or a manual reconnect request signals another round.
async fn run_connection_loop(manager: Arc<SyncManager>) {
    let client = SocketClient::new(
        manager.config.ws_url.clone(),
        Duration::from_secs(manager.config.connect_timeout_secs),
    );
    tracing::info!(ws_url = client.ws_url(), "Connection loop started");

    loop {
        if manager.cancel.is_cancelled() {
            return;
        }
        match manager.establish(&client).await {
            Established::Session(conn) => {
                manager.run_session(conn).await;
                // The channel dropped; loop around and re-establish.
            }
            Established::GaveUp => {
                manager.set_state(ConnectionState::Disconnected);
                tokio::select! {
                    _ = manager.cancel.cancelled() => return,
                    _ = manager.retry.notified() => {}
                }
            }
            Established::Cancelled => return,
        }
    }
}

/// Consume scheduled refresh requests and reconcile the cache against
/// the Job API.
///
/// Queued bursts are coalesced: one list fetch reconciles the
/// collection and every active slot, whatever mix was pending.
async fn run_refresher(
    api: Arc<JobApi>,
    cache: Arc<JobCache>,
    mut refresh_rx: mpsc::UnboundedReceiver<RefreshRequest>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Refresher stopping");
                return;
            }
            req = refresh_rx.recv() => match req {
                Some(request) => request,
                None => return,
            },
        };

        let mut drained = 1usize;
        while refresh_rx.try_recv().is_ok() {
            drained += 1;
        }

        match api.list_jobs().await {
            Ok(jobs) => {
                tracing::debug!(
                    drained,
                    count = jobs.len(),
                    first = ?request,
                    "Refreshed job collection",
                );
                cache.apply_collection(jobs);
            }
            Err(e) => {
                // The next poll tick schedules a retry; staleness stays
                // bounded by the poll interval.
                tracing::warn!(error = %e, "Job collection refresh failed");
            }
        }
    }
}

/// Periodically re-enter the connect path if the transport reports
/// disconnected and a credential is still available.
async fn run_health_check(manager: Arc<SyncManager>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(
        manager.config.health_check_interval_secs,
    ));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = manager.cancel.cancelled() => return,
            _ = ticker.tick() => {
                if !manager.is_connected() && manager.credentials.bearer().is_some() {
                    tracing::debug!("Health check requesting reconnect");
                    manager.retry.notify_one();
                }
            }
        }
    }
}
