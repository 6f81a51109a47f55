//! Synchronous event bus
//!
//! `publish` delivers to every listener registered for the event's kind, in
//! registration order, before returning. Listener errors and panics are
//! logged and dropped; they never reach the publisher.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, warn};

use super::{EventKind, RunEvent};

/// Listener callback
pub type Listener = Arc<dyn Fn(&RunEvent) -> anyhow::Result<()> + Send + Sync>;

/// Event captured while recording is enabled
#[derive(Clone, Debug, Serialize)]
pub struct RecordedEvent {
    pub at: DateTime<Utc>,
    pub event: RunEvent,
}

struct Registration {
    id: u64,
    once: bool,
    listener: Listener,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<Registration>>,
    history: Option<Vec<RecordedEvent>>,
}

/// Typed publish/subscribe channel; clones share the same listeners
#[derive(Clone, Default)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, kind: EventKind, once: bool, listener: Listener) -> Subscription {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state
            .listeners
            .entry(kind)
            .or_default()
            .push(Registration { id, once, listener });

        Subscription {
            state: Arc::downgrade(&self.state),
            kind,
            id,
        }
    }

    /// Register a listener for one event kind
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&RunEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(kind, false, Arc::new(listener))
    }

    /// Register a listener that is removed after its first delivery
    pub fn subscribe_once<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&RunEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(kind, true, Arc::new(listener))
    }

    /// Remove listeners for one kind, or for every kind when `None`
    pub fn unsubscribe_all(&self, kind: Option<EventKind>) {
        let mut state = self.lock();
        match kind {
            Some(kind) => {
                state.listeners.remove(&kind);
            }
            None => state.listeners.clear(),
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().listeners.get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Deliver an event to all current listeners of its kind
    pub fn publish(&self, event: RunEvent) {
        let kind = event.kind();

        // Snapshot under the lock, call outside it so listeners may publish or subscribe.
        let listeners: Vec<Listener> = {
            let mut state = self.lock();
            if let Some(history) = state.history.as_mut() {
                history.push(RecordedEvent {
                    at: Utc::now(),
                    event: event.clone(),
                });
            }

            match state.listeners.get_mut(&kind) {
                Some(registrations) => {
                    let snapshot = registrations.iter().map(|r| r.listener.clone()).collect();
                    registrations.retain(|r| !r.once);
                    snapshot
                }
                None => return,
            }
        };

        for listener in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Listener for {} failed: {:#}", kind, e),
                Err(_) => warn!("Listener for {} panicked", kind),
            }
        }
    }

    /// Enable or disable history capture; disabling clears the history
    pub fn set_recording(&self, enabled: bool) {
        let mut state = self.lock();
        if enabled {
            state.history.get_or_insert_with(Vec::new);
        } else {
            state.history = None;
        }
    }

    pub fn is_recording(&self) -> bool {
        self.lock().history.is_some()
    }

    /// Full recorded history, oldest first
    pub fn history(&self) -> Vec<RecordedEvent> {
        self.lock().history.clone().unwrap_or_default()
    }

    /// Recorded events of one kind
    pub fn history_for(&self, kind: EventKind) -> Vec<RecordedEvent> {
        self.lock()
            .history
            .as_ref()
            .map(|h| h.iter().filter(|r| r.event.kind() == kind).cloned().collect())
            .unwrap_or_default()
    }
}

/// Handle that removes exactly one registered listener
#[derive(Debug)]
pub struct Subscription {
    state: Weak<Mutex<BusState>>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the listener; returns false if it was already gone
    pub fn unsubscribe(self) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(registrations) = state.listeners.get_mut(&self.kind) else {
            return false;
        };

        let before = registrations.len();
        registrations.retain(|r| r.id != self.id);
        before != registrations.len()
    }
}
