//! Reference-counted room subscription registry.
//!
//! Tracks which rooms are currently of interest and re-establishes them
//! after every reconnect — the transport does not preserve topic
//! membership across reconnects, so this must be redone explicitly.
//!
//! Counting is per room: the transport-level subscribe is sent only on
//! the 0→1 transition and the unsubscribe only on the 1→0 transition,
//! so two independent consumers of the same room never starve each
//! other. Unsubscribes are fire-and-forget; no acknowledgment is
//! awaited, and once the local count hits zero a late event for that
//! room has no handler left to invoke.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use testlab_core::rooms::Room;

use crate::messages::ClientMessage;

/// Channel sender half for pushing control messages to the connection.
pub type ControlSender = mpsc::UnboundedSender<ClientMessage>;

/// Tracks room interest across connection lifetimes.
///
/// Thread-safe via interior locking; designed to be wrapped in `Arc`
/// and shared between the connection loop, observers, and callers.
pub struct SubscriptionRegistry {
    rooms: Mutex<HashMap<Room, usize>>,
    outbound: Mutex<Option<ControlSender>>,
}

impl SubscriptionRegistry {
    /// Create a registry with no rooms and no attached connection.
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
        }
    }

    /// Attach the control sender of a freshly established connection.
    ///
    /// Called once per connection lifetime, before
    /// [`resubscribe_all`](Self::resubscribe_all).
    pub fn attach(&self, sender: ControlSender) {
        *self.outbound.lock().expect("registry lock poisoned") = Some(sender);
    }

    /// Detach from a dropped connection.
    ///
    /// Room counts survive — interest is independent of connectivity.
    pub fn detach(&self) {
        *self.outbound.lock().expect("registry lock poisoned") = None;
    }

    /// Register interest in a room.
    ///
    /// Sends the transport-level subscribe only when this is the first
    /// reference. When disconnected, the interest is recorded and the
    /// subscribe goes out with the next [`resubscribe_all`].
    pub fn subscribe(&self, room: Room) {
        let first = {
            let mut rooms = self.rooms.lock().expect("registry lock poisoned");
            let count = rooms.entry(room.clone()).or_insert(0);
            *count += 1;
            *count == 1
        };

        if first {
            tracing::debug!(room = %room, "Subscribing to room");
            self.send(ClientMessage::Subscribe {
                room: room.to_string(),
            });
        }
    }

    /// Release interest in a room.
    ///
    /// Sends the transport-level unsubscribe only when the last
    /// reference is released. Unknown rooms are a no-op.
    pub fn unsubscribe(&self, room: &Room) {
        let last = {
            let mut rooms = self.rooms.lock().expect("registry lock poisoned");
            match rooms.get_mut(room) {
                Some(count) => {
                    *count -= 1;
                    if *count == 0 {
                        rooms.remove(room);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if last {
            tracing::debug!(room = %room, "Unsubscribing from room");
            self.send(ClientMessage::Unsubscribe {
                room: room.to_string(),
            });
        }
    }

    /// Re-issue subscribe for every room with a non-zero count.
    ///
    /// Called after every successful reconnect.
    pub fn resubscribe_all(&self) {
        let rooms = self.active_rooms();
        tracing::info!(count = rooms.len(), "Re-subscribing rooms after connect");
        for room in rooms {
            self.send(ClientMessage::Subscribe {
                room: room.to_string(),
            });
        }
    }

    /// Rooms currently held with a non-zero reference count.
    pub fn active_rooms(&self) -> Vec<Room> {
        self.rooms
            .lock()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Current reference count for a room.
    pub fn ref_count(&self, room: &Room) -> usize {
        self.rooms
            .lock()
            .expect("registry lock poisoned")
            .get(room)
            .copied()
            .unwrap_or(0)
    }

    /// Push a control message to the connection, if one is attached.
    ///
    /// A closed or missing channel is not an error — the interest table
    /// is reconciled on the next reconnect.
    fn send(&self, message: ClientMessage) {
        let outbound = self.outbound.lock().expect("registry lock poisoned");
        if let Some(sender) = outbound.as_ref() {
            if sender.send(message).is_err() {
                tracing::debug!("Control channel closed, message dropped");
            }
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
