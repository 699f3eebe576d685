//! Event fan-out
//!
//! Listener lists are snapshotted before delivery, so a listener may
//! subscribe or unsubscribe from inside its own callback without
//! deadlocking or skipping anyone registered at the time of the event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::protocol::{EventPayload, STATE_CHANGED};
use crate::types::{StateChangeEvent, StateChangedData};

/// Handle returned by every subscribe call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Connection status as seen by listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Authenticated and subscribed
    Connected,

    /// Transport closed or failed
    Disconnected { reason: String },

    /// The hub rejected the token and the client gave up
    AuthRejected { message: String },

    /// Every reconnect attempt failed
    ReconnectExhausted { attempts: u32 },

    /// A non-recoverable error stopped the connection
    Stopped { message: String },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered list of callbacks for one kind of event
pub struct ListenerRegistry<T> {
    listeners: Mutex<Vec<(ListenerId, Callback<T>)>>,
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T> ListenerRegistry<T> {
    fn add(&self, id: ListenerId, callback: Callback<T>) {
        self.listeners.lock().push((id, callback));
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Call every listener in registration order
    pub fn emit(&self, value: &T) -> usize {
        let snapshot: Vec<Callback<T>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in &snapshot {
            callback(value);
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

/// Routes decoded events and status changes to listeners
#[derive(Default)]
pub struct Dispatcher {
    next_id: AtomicU64,
    state_listeners: ListenerRegistry<StateChangeEvent>,
    status_listeners: ListenerRegistry<ConnectionStatus>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn subscribe_state_changes<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateChangeEvent) + Send + Sync + 'static,
    {
        let id = self.allocate();
        self.state_listeners.add(id, Arc::new(listener));
        id
    }

    pub fn on_connection_status<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        let id = self.allocate();
        self.status_listeners.add(id, Arc::new(listener));
        id
    }

    /// Remove a listener of either kind
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.state_listeners.remove(id) || self.status_listeners.remove(id)
    }

    /// Channel view of state changes; the listener goes away with the receiver
    pub fn state_changes(self: &Arc<Self>) -> mpsc::UnboundedReceiver<StateChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::downgrade(self);
        let id_slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&id_slot);

        let id = self.subscribe_state_changes(move |event| {
            if tx.send(event.clone()).is_err() {
                if let (Some(dispatcher), Some(id)) = (dispatcher.upgrade(), *slot.lock()) {
                    dispatcher.unsubscribe(id);
                }
            }
        });
        *id_slot.lock() = Some(id);
        rx
    }

    /// Route one hub event; anything other than a usable state change is dropped
    pub fn handle_event(&self, event: &EventPayload) -> bool {
        if event.event_type != STATE_CHANGED {
            trace!(event_type = %event.event_type, "Ignoring event");
            return false;
        }

        let data: StateChangedData = match serde_json::from_value(event.data.clone()) {
            Ok(data) => data,
            Err(e) => {
                debug!(error = %e, "Malformed state_changed payload");
                return false;
            }
        };

        let Some(change) = data.into_event() else {
            trace!("Ignoring removal event without new_state");
            return false;
        };

        self.state_listeners.emit(&change);
        true
    }

    pub fn notify_status(&self, status: ConnectionStatus) {
        debug!(status = ?status, "Connection status changed");
        self.status_listeners.emit(&status);
    }

    pub fn state_listener_count(&self) -> usize {
        self.state_listeners.len()
    }
}
