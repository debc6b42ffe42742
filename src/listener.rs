//! Listener Registration
//!
//! Shared callback bookkeeping for the variable store, the state machine
//! and the event dispatcher. Callbacks run synchronously on the notifying
//! thread; a panicking callback is logged and skipped.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::error;
use parking_lot::Mutex;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned when registering a listener, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Callback invoked with a reference to a notification payload.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered list of callbacks for one notification type.
pub(crate) struct ListenerList<T> {
    entries: Mutex<Vec<(ListenerId, Callback<T>)>>,
}

impl<T> ListenerList<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, callback: Callback<T>) -> ListenerId {
        let id = ListenerId::next();
        self.entries.lock().push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Invokes every callback, in registration order, against a snapshot of
    /// the list taken before the first call.
    pub(crate) fn notify(&self, kind: &str, payload: &T) {
        let snapshot: Vec<Callback<T>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            invoke_guarded(kind, || callback(payload));
        }
    }
}

/// Runs `f`, logging and swallowing any panic it raises.
pub(crate) fn invoke_guarded<F: FnOnce()>(kind: &str, f: F) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!("{} listener failed: {}", kind, panic_message(payload.as_ref()));
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<unknown panic>".to_string()
    }
}
