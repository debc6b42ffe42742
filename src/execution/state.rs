//! Execution State Machine
//!
//! Lifecycle state attached one-to-one to an execution context.
//!
//! ```text
//! Pending -> Running -> Completed
//!               |  ^ -> Failed
//!               v  |  -> Aborted
//!              Paused -> Aborted
//! ```
//!
//! The transition table in [`ExecutionState::can_transition_to`] is the only
//! source of truth for legality. An illegal request is rejected and leaves
//! the state untouched.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StateError;
use crate::listener::{ListenerId, ListenerList};

/// Lifecycle state of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Aborted,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    /// Returns true if `self -> to` is in the transition table.
    pub fn can_transition_to(&self, to: ExecutionState) -> bool {
        use ExecutionState::*;

        matches!(
            (self, to),
            (Pending, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Aborted)
                | (Paused, Aborted)
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification fired on every successful transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub old_state: ExecutionState,
    pub new_state: ExecutionState,
    pub timestamp: DateTime<Utc>,
}

/// Serializable form of a state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state: ExecutionState,
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe state machine with transition listeners.
pub struct ExecutionStateMachine {
    current: Mutex<StateSnapshot>,
    listeners: ListenerList<StateChange>,
}

impl ExecutionStateMachine {
    /// Creates a machine in the `Pending` state.
    pub fn new() -> Self {
        Self::from_snapshot(StateSnapshot {
            state: ExecutionState::Pending,
            updated_at: Utc::now(),
        })
    }

    pub(crate) fn from_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            current: Mutex::new(snapshot),
            listeners: ListenerList::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ExecutionState {
        self.current.lock().state
    }

    /// Time of the last transition (or creation).
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.current.lock().updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Moves to `to` if the transition table allows it.
    ///
    /// Listeners are notified after the state lock is released, so they may
    /// query the machine freely.
    pub fn transition_to(&self, to: ExecutionState) -> Result<StateChange, StateError> {
        let change = {
            let mut current = self.current.lock();
            let from = current.state;

            if !from.can_transition_to(to) {
                return Err(StateError::IllegalTransition { from, to });
            }

            let now = Utc::now();
            current.state = to;
            current.updated_at = now;

            StateChange {
                old_state: from,
                new_state: to,
                timestamp: now,
            }
        };

        debug!("State transition: {} -> {}", change.old_state, change.new_state);
        self.listeners.notify("State change", &change);
        Ok(change)
    }

    /// Registers a transition listener.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.current.lock().clone()
    }

    /// Serializes the current state and timestamp.
    pub fn to_dict(&self) -> Value {
        serde_json::to_value(self.snapshot()).unwrap_or(Value::Null)
    }

    /// Rebuilds a machine from [`to_dict`](Self::to_dict) output.
    pub fn from_dict(value: &Value) -> Result<Self, serde_json::Error> {
        let snapshot = StateSnapshot::deserialize(value)?;
        Ok(Self::from_snapshot(snapshot))
    }
}

impl Clone for ExecutionStateMachine {
    /// Copies state and timestamp. Listeners are not carried over.
    fn clone(&self) -> Self {
        Self::from_snapshot(self.snapshot())
    }
}

impl Default for ExecutionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("ExecutionStateMachine")
            .field("state", &snapshot.state)
            .field("updated_at", &snapshot.updated_at)
            .finish()
    }
}
