//! Lifecycle Events
//!
//! Immutable notifications published by the engine. Workflow-level events
//! describe a whole run; action-level events describe one action at one
//! index. Both implement [`Event`], which is what listeners receive.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::execution::action::ActionResult;
use crate::variables::VariableMap;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowStarted,
    WorkflowPaused,
    WorkflowResumed,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowAborted,
    ActionStarted,
    ActionCompleted,
    ActionFailed,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::WorkflowStarted,
        EventType::WorkflowPaused,
        EventType::WorkflowResumed,
        EventType::WorkflowCompleted,
        EventType::WorkflowFailed,
        EventType::WorkflowAborted,
        EventType::ActionStarted,
        EventType::ActionCompleted,
        EventType::ActionFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowPaused => "workflow_paused",
            Self::WorkflowResumed => "workflow_resumed",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
            Self::WorkflowAborted => "workflow_aborted",
            Self::ActionStarted => "action_started",
            Self::ActionCompleted => "action_completed",
            Self::ActionFailed => "action_failed",
        }
    }

    pub fn is_workflow_event(&self) -> bool {
        !self.is_action_event()
    }

    pub fn is_action_event(&self) -> bool {
        matches!(
            self,
            Self::ActionStarted | Self::ActionCompleted | Self::ActionFailed
        )
    }

    /// Events that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted | Self::WorkflowFailed | Self::WorkflowAborted
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability shared by every event delivered to listeners.
pub trait Event: fmt::Debug + Send + Sync {
    fn event_type(&self) -> EventType;

    fn run_id(&self) -> &str;

    fn timestamp(&self) -> DateTime<Utc>;

    /// Free-form payload attached by the publisher.
    fn data(&self) -> &VariableMap;

    /// Returns the action-level view of this event, if it is one.
    fn as_action_event(&self) -> Option<&ActionEvent> {
        None
    }

    /// JSON rendering for observers that forward events elsewhere.
    fn to_json(&self) -> Value;
}

/// Run-level lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub event_type: EventType,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "VariableMap::is_empty")]
    pub data: VariableMap,
    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(event_type: EventType, run_id: impl Into<String>) -> Self {
        Self {
            event_type,
            run_id: run_id.into(),
            data: VariableMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attaches one payload entry.
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

impl Event for WorkflowEvent {
    fn event_type(&self) -> EventType {
        self.event_type
    }

    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn data(&self) -> &VariableMap {
        &self.data
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Action-level lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub event_type: EventType,
    pub run_id: String,
    pub action_name: String,
    pub action_index: usize,
    /// Present on completion and failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
    #[serde(default, skip_serializing_if = "VariableMap::is_empty")]
    pub data: VariableMap,
    pub timestamp: DateTime<Utc>,
}

impl ActionEvent {
    pub fn new(
        event_type: EventType,
        run_id: impl Into<String>,
        action_name: impl Into<String>,
        action_index: usize,
    ) -> Self {
        Self {
            event_type,
            run_id: run_id.into(),
            action_name: action_name.into(),
            action_index,
            result: None,
            data: VariableMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_result(mut self, result: ActionResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

impl Event for ActionEvent {
    fn event_type(&self) -> EventType {
        self.event_type
    }

    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn data(&self) -> &VariableMap {
        &self.data
    }

    fn as_action_event(&self) -> Option<&ActionEvent> {
        Some(self)
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
