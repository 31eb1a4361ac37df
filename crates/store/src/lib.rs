//! Generic keyed reactive store.
//!
//! [`ReactiveStore`] is the local storage primitive the synchronization
//! engine writes into and UI consumers read from. Values are stored as
//! `Arc<V>` snapshots: every write replaces the whole snapshot, so a
//! reader holding a previous `Arc` keeps a consistent view no matter
//! what happens to the store afterwards.
//!
//! Writers notify subscribers through a [`tokio::sync::broadcast`]
//! channel of [`StoreChange`] notices. A send with no receivers is not
//! an error — it only means nobody is currently watching.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

/// Default buffer capacity for the change-notice channel.
const DEFAULT_CHANGE_CAPACITY: usize = 256;

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The snapshot for the key was replaced.
    Updated,
    /// The snapshot was marked stale; holders should refetch. The value
    /// itself is left in place for readers that tolerate staleness.
    Invalidated,
    /// The entry was removed.
    Removed,
}

/// A change notice delivered to store subscribers.
#[derive(Debug, Clone)]
pub struct StoreChange<K> {
    pub key: K,
    pub kind: ChangeKind,
}

/// Keyed snapshot store with change notification.
///
/// Designed to be wrapped in `Arc` and shared across tasks. All
/// operations are synchronous; the lock is held only for the duration
/// of the map access, never across user code — the merge closure passed
/// to [`update`](Self::update) runs under the write lock but must be
/// pure (no I/O, no awaits).
pub struct ReactiveStore<K, V> {
    entries: RwLock<HashMap<K, Arc<V>>>,
    changes: broadcast::Sender<StoreChange<K>>,
}

impl<K, V> ReactiveStore<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(DEFAULT_CHANGE_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Current snapshot for `key`, if any.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.read().expect("store lock poisoned").get(key).cloned()
    }

    /// Replace the snapshot for `key` wholesale.
    pub fn set(&self, key: K, value: V) {
        self.entries
            .write()
            .expect("store lock poisoned")
            .insert(key.clone(), Arc::new(value));
        self.notify(key, ChangeKind::Updated);
    }

    /// Compute a new snapshot for `key` from the previous one.
    ///
    /// `merge` receives the current snapshot (or `None` when absent) and
    /// returns the replacement; returning `None` leaves the store
    /// untouched and emits no change notice. Returns whether a new
    /// snapshot was published.
    pub fn update(&self, key: &K, merge: impl FnOnce(Option<&V>) -> Option<V>) -> bool {
        let published = {
            let mut entries = self.entries.write().expect("store lock poisoned");
            let prev = entries.get(key).map(Arc::as_ref);
            match merge(prev) {
                Some(next) => {
                    entries.insert(key.clone(), Arc::new(next));
                    true
                }
                None => false,
            }
        };
        if published {
            self.notify(key.clone(), ChangeKind::Updated);
        }
        published
    }

    /// Remove the entry for `key`, returning the last snapshot.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        let removed = self.entries.write().expect("store lock poisoned").remove(key);
        if removed.is_some() {
            self.notify(key.clone(), ChangeKind::Removed);
        }
        removed
    }

    /// Mark `key` stale without destroying the snapshot.
    ///
    /// Readers keep whatever `Arc` they already hold; subscribers get an
    /// `Invalidated` notice so a refetch can be scheduled.
    pub fn invalidate(&self, key: &K) {
        self.notify(key.clone(), ChangeKind::Invalidated);
    }

    /// Subscribe to change notices for every key in this store.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange<K>> {
        self.changes.subscribe()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.read().expect("store lock poisoned").len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, key: K, kind: ChangeKind) {
        // Ignore the SendError — it only means there are zero receivers.
        let _ = self.changes.send(StoreChange { key, kind });
    }
}

impl<K, V> Default for ReactiveStore<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_none_for_missing_key() {
        let store: ReactiveStore<String, i32> = ReactiveStore::new();
        assert!(store.get(&"absent".to_string()).is_none());
    }

    #[test]
    fn set_then_get_returns_snapshot() {
        let store = ReactiveStore::new();
        store.set("k".to_string(), 7);
        assert_eq!(*store.get(&"k".to_string()).unwrap(), 7);
    }

    #[test]
    fn old_snapshot_survives_replacement() {
        let store = ReactiveStore::new();
        store.set("k".to_string(), vec![1, 2, 3]);
        let held = store.get(&"k".to_string()).unwrap();

        store.set("k".to_string(), vec![9]);

        // The reader's snapshot is untouched by the replacement.
        assert_eq!(*held, vec![1, 2, 3]);
        assert_eq!(*store.get(&"k".to_string()).unwrap(), vec![9]);
    }

    #[test]
    fn update_merges_from_previous_snapshot() {
        let store = ReactiveStore::new();
        store.set("k".to_string(), 10);

        let published = store.update(&"k".to_string(), |prev| prev.map(|v| v + 5));
        assert!(published);
        assert_eq!(*store.get(&"k".to_string()).unwrap(), 15);
    }

    #[test]
    fn update_returning_none_is_a_noop() {
        let store: ReactiveStore<String, i32> = ReactiveStore::new();
        let published = store.update(&"absent".to_string(), |prev| prev.map(|v| v + 1));
        assert!(!published);
        assert!(store.get(&"absent".to_string()).is_none());
    }

    #[tokio::test]
    async fn subscribers_receive_update_notices() {
        let store = ReactiveStore::new();
        let mut rx = store.subscribe();

        store.set("k".to_string(), 1);

        let change = rx.recv().await.unwrap();
        assert_eq!(change.key, "k");
        assert_eq!(change.kind, ChangeKind::Updated);
    }

    #[tokio::test]
    async fn invalidate_notifies_without_removing() {
        let store = ReactiveStore::new();
        store.set("k".to_string(), 1);
        let mut rx = store.subscribe();

        store.invalidate(&"k".to_string());

        let change = rx.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Invalidated);
        assert!(store.get(&"k".to_string()).is_some());
    }

    #[test]
    fn notice_with_no_subscribers_does_not_panic() {
        let store = ReactiveStore::new();
        store.set("k".to_string(), 1);
        store.invalidate(&"k".to_string());
        store.remove(&"k".to_string());
    }

    #[test]
    fn noop_update_emits_no_notice() {
        let store: ReactiveStore<String, i32> = ReactiveStore::new();
        let mut rx = store.subscribe();
        store.update(&"absent".to_string(), |_| None);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
