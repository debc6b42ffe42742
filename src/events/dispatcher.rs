//! Event Dispatcher
//!
//! Synchronous publish/subscribe bus. Listeners subscribe to one event type
//! or, with `None`, to every type. Dispatch walks a snapshot of the
//! registrations in registration order, so listeners may add or remove
//! listeners from inside a callback; the change applies from the next
//! dispatch on.

use std::fmt;
use std::sync::Arc;

use log::trace;
use parking_lot::RwLock;

use crate::listener::{invoke_guarded, ListenerId};

use super::event::{Event, EventType};

/// Callback receiving dispatched events.
pub type EventCallback = Arc<dyn Fn(&dyn Event) + Send + Sync>;

#[derive(Clone)]
struct Registration {
    id: ListenerId,
    event_type: Option<EventType>,
    callback: EventCallback,
}

impl Registration {
    fn matches(&self, event_type: EventType) -> bool {
        self.event_type.map_or(true, |wanted| wanted == event_type)
    }
}

/// Publish/subscribe bus for workflow and action events.
pub struct EventDispatcher {
    registrations: RwLock<Vec<Registration>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes `callback` to `event_type`, or to every type with `None`.
    pub fn add_listener<F>(&self, event_type: Option<EventType>, callback: F) -> ListenerId
    where
        F: Fn(&dyn Event) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.registrations.write().push(Registration {
            id,
            event_type,
            callback: Arc::new(callback),
        });
        id
    }

    /// Unsubscribes a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|registration| registration.id != id);
        registrations.len() != before
    }

    /// Number of registered listeners for `event_type` (`None` counts all).
    pub fn listener_count(&self, event_type: Option<EventType>) -> usize {
        let registrations = self.registrations.read();
        match event_type {
            Some(event_type) => registrations.iter().filter(|r| r.matches(event_type)).count(),
            None => registrations.len(),
        }
    }

    pub fn clear(&self) {
        self.registrations.write().clear();
    }

    /// Delivers `event` to every matching listener.
    ///
    /// A panicking listener is logged and skipped; it never reaches the
    /// caller or the remaining listeners.
    pub fn dispatch(&self, event: &dyn Event) {
        let event_type = event.event_type();
        let targets: Vec<Registration> = self
            .registrations
            .read()
            .iter()
            .filter(|registration| registration.matches(event_type))
            .cloned()
            .collect();

        trace!(
            "Dispatching {} for run '{}' to {} listener(s)",
            event_type,
            event.run_id(),
            targets.len()
        );

        for registration in targets {
            invoke_guarded("Event", || (registration.callback)(event));
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.registrations.read().len())
            .finish()
    }
}
