//! Workflow Execution Module
//!
//! Runs ordered action lists against a per-run execution context, with
//! pause, resume and abort at action boundaries.
//!
//! # Architecture
//!
//! - [`state`]: Lifecycle state machine attached to every context
//! - [`context`]: Variable store plus state machine, nestable
//! - [`action`]: The action contract and its result type
//! - [`run`]: Run records, results and status snapshots
//! - [`engine`]: The orchestrator
//! - `pool`: Worker threads for submitted runs and continuations

pub mod action;
pub mod context;
pub mod engine;
mod pool;
pub mod run;
pub mod state;

pub use action::{action_fn, Action, ActionError, ActionResult, ContextSource, FnAction};
pub use context::{ContextOptions, ContextSnapshot, ContextTree, ExecutionContext};
pub use engine::WorkflowEngine;
pub use run::{RunResult, WorkflowStatus, WorkflowStatusSnapshot};
pub use state::{ExecutionState, ExecutionStateMachine, StateChange, StateSnapshot};
