//! ActionRunner - Workflow Execution Engine
//!
//! Runs ordered lists of actions against a shared, scoped variable store,
//! with pause, resume and abort supported between actions.
//!
//! # Architecture
//!
//! The library is organized into these modules:
//!
//! - [`variables`]: Scoped variable store with parent fallback
//! - [`execution`]: Execution contexts, state machine and the engine
//! - [`events`]: Lifecycle events and the dispatcher
//! - [`monitoring`]: Per-run statistics and timelines
//! - [`workflow`]: Workflow files, the action registry and built-in actions
//! - [`config`]: Engine configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use actionrunner::workflow::ActionRegistry;
//! use actionrunner::{load_workflow, EngineConfig, WorkflowEngine};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a workflow from YAML
//!     let definition = load_workflow("checks.yaml")?;
//!     let actions = ActionRegistry::with_builtins().build_all(&definition.steps)?;
//!
//!     // Run it to completion on the calling thread
//!     let engine = WorkflowEngine::new(EngineConfig::discover()?);
//!     let result = engine.execute_workflow(actions, Some(definition.variables.into()), None);
//!     println!("{}: {}", result.run_id, result.message);
//!     Ok(())
//! }
//! ```

mod listener;

pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod monitoring;
pub mod variables;
pub mod workflow;

// Re-export commonly used types
pub use config::EngineConfig;
pub use events::{Event, EventDispatcher, EventType};
pub use execution::{Action, ActionResult, ExecutionContext, ExecutionState, RunResult, WorkflowEngine};
pub use listener::ListenerId;
pub use variables::{VariableScope, VariableStore};
pub use workflow::parser::load_workflow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "ActionRunner";
