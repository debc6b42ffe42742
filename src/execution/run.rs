//! Run Records
//!
//! Engine-side bookkeeping for one run id, plus the result and status shapes
//! handed back to callers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::listener::ListenerId;
use crate::monitoring::WorkflowStatistics;

use super::action::{Action, ActionResult};
use super::context::ExecutionContext;
use super::state::ExecutionState;

/// Run status as tracked by the engine.
///
/// Mirrors [`ExecutionState`] but is owned by the run record, so it survives
/// whatever happens to the context between pause and resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Aborted,
}

impl WorkflowStatus {
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

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value returned when a run loop exits or a run is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    /// `None` while the run is paused
    pub success: Option<bool>,
    pub message: String,
    pub results: Vec<ActionResult>,
    /// True only once the loop has run to the end of the action list or to
    /// the first failure
    pub completed: bool,
}

impl RunResult {
    pub(crate) fn finished(run_id: &str, success: bool, message: String, results: Vec<ActionResult>) -> Self {
        Self {
            run_id: run_id.to_string(),
            success: Some(success),
            message,
            results,
            completed: true,
        }
    }

    pub(crate) fn paused(run_id: &str, index: usize, results: Vec<ActionResult>) -> Self {
        Self {
            run_id: run_id.to_string(),
            success: None,
            message: format!("Workflow paused before action {}", index),
            results,
            completed: false,
        }
    }

    pub(crate) fn aborted(run_id: &str, results: Vec<ActionResult>) -> Self {
        Self {
            run_id: run_id.to_string(),
            success: Some(false),
            message: "Workflow aborted".to_string(),
            results,
            completed: false,
        }
    }

    pub(crate) fn rejected(run_id: &str, message: String) -> Self {
        Self {
            run_id: run_id.to_string(),
            success: Some(false),
            message,
            results: Vec::new(),
            completed: false,
        }
    }

    /// True for a run that finished with every action succeeding.
    pub fn is_success(&self) -> bool {
        self.completed && self.success == Some(true)
    }

    pub fn is_paused(&self) -> bool {
        !self.completed && self.success.is_none()
    }
}

/// Read-only view of a run's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStatusSnapshot {
    pub run_id: String,
    pub status: WorkflowStatus,
    /// Index of the next action to run
    pub current_index: usize,
    pub total_actions: usize,
    pub completed_actions: usize,
    pub context_state: ExecutionState,
}

impl WorkflowStatusSnapshot {
    pub fn status_name(&self) -> &'static str {
        self.status.as_str()
    }

    pub fn context_state_name(&self) -> &'static str {
        self.context_state.as_str()
    }
}

/// Mutable part of a run record, guarded by the run lock.
#[derive(Debug, Default)]
pub(crate) struct RunControl {
    pub(crate) status: WorkflowStatus,
    pub(crate) current_index: usize,
    pub(crate) results: Vec<ActionResult>,
    /// Member of the running set
    pub(crate) running: bool,
    /// Member of the paused set
    pub(crate) paused: bool,
    /// A loop owns this run, either executing or queued on the pool
    pub(crate) loop_active: bool,
    /// `WorkflowStarted` has been published
    pub(crate) started: bool,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl RunControl {
    /// Nothing will change without an external call.
    pub(crate) fn is_settled(&self) -> bool {
        !self.loop_active && (self.status.is_terminal() || self.status == WorkflowStatus::Paused)
    }
}

/// Engine-held entry for one run id.
pub(crate) struct RunRecord {
    pub(crate) run_id: String,
    pub(crate) actions: Vec<Arc<dyn Action>>,
    pub(crate) context: Arc<ExecutionContext>,
    pub(crate) statistics: Arc<Mutex<WorkflowStatistics>>,
    pub(crate) statistics_listener: ListenerId,
    pub(crate) control: Mutex<RunControl>,
    settled: Condvar,
}

impl RunRecord {
    pub(crate) fn new(
        run_id: String,
        actions: Vec<Arc<dyn Action>>,
        context: Arc<ExecutionContext>,
        statistics: Arc<Mutex<WorkflowStatistics>>,
        statistics_listener: ListenerId,
    ) -> Self {
        Self {
            run_id,
            actions,
            context,
            statistics,
            statistics_listener,
            control: Mutex::new(RunControl {
                running: true,
                ..RunControl::default()
            }),
            settled: Condvar::new(),
        }
    }

    pub(crate) fn status_snapshot(&self) -> WorkflowStatusSnapshot {
        let control = self.control.lock();
        self.snapshot_from(&control)
    }

    fn snapshot_from(&self, control: &RunControl) -> WorkflowStatusSnapshot {
        WorkflowStatusSnapshot {
            run_id: self.run_id.clone(),
            status: control.status,
            current_index: control.current_index,
            total_actions: self.actions.len(),
            completed_actions: control.results.iter().filter(|r| r.success).count(),
            context_state: self.context.state(),
        }
    }

    /// Wakes callers blocked in [`wait_settled`](Self::wait_settled).
    pub(crate) fn notify_settled(&self) {
        self.settled.notify_all();
    }

    /// Blocks until the run is terminal or parked, or `timeout` elapses.
    pub(crate) fn wait_settled(&self, timeout: Duration) -> WorkflowStatusSnapshot {
        let mut control = self.control.lock();
        let deadline = std::time::Instant::now() + timeout;

        while !control.is_settled() {
            if self.settled.wait_until(&mut control, deadline).timed_out() {
                break;
            }
        }

        self.snapshot_from(&control)
    }

    pub(crate) fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.control.lock().finished_at
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.control.lock().status.is_terminal()
    }
}

impl fmt::Debug for RunRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRecord")
            .field("run_id", &self.run_id)
            .field("actions", &self.actions.len())
            .field("control", &*self.control.lock())
            .finish()
    }
}
