//! Lifecycle tests for `JobObserver`.
//!
//! Verify that an observer holds its per-job room for exactly its own
//! lifetime, filters events to its job id, and exposes derived state
//! that follows the status machine.

use std::sync::Arc;

use testlab_core::rooms::Room;
use testlab_core::JobStatus;
use testlab_sync::events::{JobEvent, SyncEvent};
use testlab_sync::messages::parse_message;
use testlab_sync::observer::JobObserver;
use testlab_sync::subscriptions::SubscriptionRegistry;
use tokio::sync::broadcast;

fn event(frame: &str) -> JobEvent {
    parse_message(frame)
        .expect("frame should parse")
        .into_job_event()
        .expect("frame should be a lifecycle event")
}

fn observer_under_test(
    job_id: &str,
) -> (
    JobObserver,
    Arc<SubscriptionRegistry>,
    broadcast::Sender<SyncEvent>,
) {
    let registry = Arc::new(SubscriptionRegistry::new());
    let (event_tx, _) = broadcast::channel(64);
    let observer = JobObserver::new(job_id.into(), Arc::clone(&registry), event_tx.subscribe());
    (observer, registry, event_tx)
}

// ---------------------------------------------------------------------------
// Test: construction subscribes the room, drop releases it
// ---------------------------------------------------------------------------

#[tokio::test]
async fn room_subscription_is_scoped_to_observer_lifetime() {
    let (observer, registry, _event_tx) = observer_under_test("j1");
    let room = Room::Job("j1".into());

    assert_eq!(registry.ref_count(&room), 1);

    drop(observer);
    assert_eq!(registry.ref_count(&room), 0);
}

// ---------------------------------------------------------------------------
// Test: two observers of the same job share the room refcount
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_observers_share_the_room() {
    let registry = Arc::new(SubscriptionRegistry::new());
    let (event_tx, _) = broadcast::channel::<SyncEvent>(64);
    let room = Room::Job("j1".into());

    let first = JobObserver::new("j1".into(), Arc::clone(&registry), event_tx.subscribe());
    let second = JobObserver::new("j1".into(), Arc::clone(&registry), event_tx.subscribe());
    assert_eq!(registry.ref_count(&room), 2);

    drop(first);
    // The survivor keeps the room alive.
    assert_eq!(registry.ref_count(&room), 1);

    drop(second);
    assert_eq!(registry.ref_count(&room), 0);
}

// ---------------------------------------------------------------------------
// Test: events update the state machine through the watch channel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_drive_the_state_machine() {
    let (observer, _registry, event_tx) = observer_under_test("j1");
    let mut state_rx = observer.watch();

    assert_eq!(observer.state().status, JobStatus::Pending);

    event_tx
        .send(SyncEvent::Job(event(
            r#"{"type":"job:started","data":{"id":"j1","status":"RUNNING","startedAt":"2026-08-01T10:00:05Z"}}"#,
        )))
        .unwrap();
    state_rx.changed().await.unwrap();
    assert!(observer.is_running());

    event_tx
        .send(SyncEvent::Job(event(
            r#"{"type":"job:progress","data":{"id":"j1","progress":40,"message":"running step 2"}}"#,
        )))
        .unwrap();
    state_rx.changed().await.unwrap();
    let state = observer.state();
    assert_eq!(state.progress, 40);
    assert_eq!(state.progress_message.as_deref(), Some("running step 2"));

    event_tx
        .send(SyncEvent::Job(event(
            r#"{"type":"job:completed","data":{"id":"j1","type":"RUN_TESTS","status":"COMPLETED","resultData":{"ok":true},"completedAt":"2026-08-01T10:05:00Z","durationMs":5000}}"#,
        )))
        .unwrap();
    state_rx.changed().await.unwrap();
    assert!(observer.is_completed());
    assert!(!observer.is_running());
    assert_eq!(observer.state().progress, 100);
}

// ---------------------------------------------------------------------------
// Test: events for a different job id are ignored
// ---------------------------------------------------------------------------

#[tokio::test]
async fn foreign_events_do_not_corrupt_state() {
    let (observer, _registry, event_tx) = observer_under_test("j1");
    let mut state_rx = observer.watch();

    // An event for another job delivered through the coarse room.
    event_tx
        .send(SyncEvent::Job(event(
            r#"{"type":"job:failed","data":{"id":"other","type":"RUN_TESTS","status":"FAILED","errorMessage":"boom","completedAt":"2026-08-01T10:05:00Z"}}"#,
        )))
        .unwrap();
    // Then one for ours, as a fence to know the task processed both.
    event_tx
        .send(SyncEvent::Job(event(
            r#"{"type":"job:progress","data":{"id":"j1","progress":10}}"#,
        )))
        .unwrap();

    state_rx.changed().await.unwrap();
    let state = observer.state();
    assert_eq!(state.status, JobStatus::Pending);
    assert!(!state.is_failed());
    assert_eq!(state.progress, 10);
}

// ---------------------------------------------------------------------------
// Test: reset_state reseeds to PENDING
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reset_state_reseeds_to_pending() {
    let (observer, _registry, event_tx) = observer_under_test("j1");
    let mut state_rx = observer.watch();

    event_tx
        .send(SyncEvent::Job(event(
            r#"{"type":"job:completed","data":{"id":"j1","type":"RUN_TESTS","status":"COMPLETED","resultData":{},"completedAt":"2026-08-01T10:05:00Z","durationMs":5000}}"#,
        )))
        .unwrap();
    state_rx.changed().await.unwrap();
    assert!(observer.is_completed());

    observer.reset_state();
    let state = observer.state();
    assert_eq!(state.status, JobStatus::Pending);
    assert_eq!(state.progress, 0);
    assert!(state.result.is_none());
}

// ---------------------------------------------------------------------------
// Test: connection events pass through without touching job state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connection_events_do_not_touch_job_state() {
    let (observer, _registry, event_tx) = observer_under_test("j1");
    let mut state_rx = observer.watch();

    event_tx
        .send(SyncEvent::ChannelConnected {
            session_id: "s-1".into(),
        })
        .unwrap();
    event_tx.send(SyncEvent::ChannelDisconnected).unwrap();
    // Fence event.
    event_tx
        .send(SyncEvent::Job(event(
            r#"{"type":"job:progress","data":{"id":"j1","progress":5}}"#,
        )))
        .unwrap();

    state_rx.changed().await.unwrap();
    let state = observer.state();
    assert_eq!(state.status, JobStatus::Pending);
    assert_eq!(state.progress, 5);
}
