//! Error Types
//!
//! One error enum per concern. Run-control calls on the engine never return
//! these for unknown run ids; they report `false` or `None` instead.

use thiserror::Error;

use crate::execution::state::ExecutionState;
use crate::workflow::parser::ValidationError;

/// Errors raised by the variable store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VariableError {
    /// Name does not match `[A-Za-z_][A-Za-z0-9_]*`
    #[error("Invalid variable name '{0}': names must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidName(String),
}

/// Errors raised by the execution state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Illegal state transition: {from} -> {to}")]
    IllegalTransition {
        from: ExecutionState,
        to: ExecutionState,
    },
}

/// Errors raised while rebuilding a context from a snapshot.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Malformed context snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("Context snapshot contains an invalid variable: {0}")]
    Variable(#[from] VariableError),
}

/// Errors raised by the action registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Action type tag must not be empty")]
    EmptyTag,

    #[error("Action type '{0}' is already registered")]
    DuplicateTag(String),

    #[error("Unknown action type '{0}'")]
    UnknownTag(String),

    #[error("Invalid parameters for action type '{tag}': {reason}")]
    InvalidParams { tag: String, reason: String },
}

impl RegistryError {
    /// Shorthand used by factories rejecting their parameters.
    pub fn invalid_params(tag: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            tag: tag.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while loading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors raised while loading a workflow definition file.
#[derive(Debug, Error)]
pub enum WorkflowLoadError {
    #[error("Failed to read workflow file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse workflow YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid workflow: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

/// Errors raised by engine operations that are not run-control calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Run '{0}' is still active and cannot be replaced")]
    RunActive(String),

    #[error("Context '{context_id}' is {state}; a run needs a pending context")]
    ContextNotPending {
        context_id: String,
        state: ExecutionState,
    },

    #[error("Worker pool has been shut down")]
    PoolShutDown,
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
