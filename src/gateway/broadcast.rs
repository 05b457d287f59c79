//! Change broadcaster.
//!
//! Subscribes once to the content store and fans a change signal out to
//! every open client connection. The store emits one `Ready` event for its
//! synchronous initial load; broadcasting that would tell freshly-connected
//! clients to refetch a payload they have not even rendered yet, so an
//! explicit two-state machine swallows it and arms on everything after.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{ContentStore, StoreEvent};

/// Payload pushed to clients on every change.
const CHANGE_SIGNAL: &str = r#"{"type":"changed"}"#;

/// Arming state of the broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArmState {
    /// Waiting for the store's initial-load event.
    AwaitingFirstReady,
    /// Initial load seen; every further event broadcasts.
    Armed,
}

impl ArmState {
    /// Apply one store event: returns the next state and whether to
    /// broadcast. A first `Ready` arms silently; a real mutation arriving
    /// before `Ready` arms AND broadcasts, so an early change is never
    /// dropped.
    fn on_event(self, event: StoreEvent) -> (Self, bool) {
        match (self, event) {
            (Self::AwaitingFirstReady, StoreEvent::Ready) => (Self::Armed, false),
            (Self::AwaitingFirstReady | Self::Armed, _) => (Self::Armed, true),
        }
    }
}

/// Fans store change events out to all registered connections.
pub struct ChangeBroadcaster {
    /// Open connections; explicit mutex because the runtime is
    /// multi-threaded.
    connections: Mutex<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
    /// Store event pump task
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Guards the subscribe-exactly-once contract
    attached: AtomicBool,
}

impl ChangeBroadcaster {
    /// Create a broadcaster with no connections and no subscription.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            pump: Mutex::new(None),
            attached: AtomicBool::new(false),
        }
    }

    /// Subscribe to the store's change feed. Must run before the store
    /// emits `Ready`, and only once per broadcaster lifetime; a repeated
    /// attach is refused.
    pub fn attach(self: &Arc<Self>, store: &dyn ContentStore) {
        if self.attached.swap(true, Ordering::SeqCst) {
            warn!("ChangeBroadcaster::attach called twice, ignoring");
            return;
        }

        let mut rx = store.subscribe();
        let broadcaster = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut state = ArmState::AwaitingFirstReady;
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        // Coalescing is the point: collapse the backlog
                        // into one signal.
                        debug!(missed, "Store event backlog collapsed");
                        StoreEvent::Mutated
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                let (next, broadcast) = state.on_event(event);
                state = next;
                if broadcast {
                    broadcaster.broadcast_change();
                }
            }
        });
        *self.pump.lock() = Some(handle);
    }

    /// Stop consuming store events. First step of the shutdown sequence;
    /// dropping the pump also releases the store subscription.
    pub fn detach(&self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }

    /// Register a new client connection. Returns the connection id and the
    /// receiving end the transport forwards to the socket.
    pub fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.connections.lock().insert(id, tx);
        debug!(connection = %id, "Client connection registered");
        (id, rx)
    }

    /// Remove a connection after close or error.
    pub fn unregister(&self, id: Uuid) {
        if self.connections.lock().remove(&id).is_some() {
            debug!(connection = %id, "Client connection removed");
        }
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Force-close every connection. Used at shutdown.
    pub fn close_all(&self) {
        let mut connections = self.connections.lock();
        let count = connections.len();
        connections.clear();
        if count > 0 {
            info!(connections = count, "Closed all client connections");
        }
    }

    /// Send one change signal to every open connection. A send failure
    /// (half-closed socket) drops that connection and never aborts the
    /// fan-out to the rest.
    fn broadcast_change(&self) {
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|id, tx| {
            if tx.send(CHANGE_SIGNAL.to_string()).is_ok() {
                true
            } else {
                debug!(connection = %id, "Dropping dead connection during broadcast");
                false
            }
        });
        debug!(
            delivered = connections.len(),
            dropped = before - connections.len(),
            "Change broadcast"
        );
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
