//! Action Contract
//!
//! An action is an opaque unit of work. The engine hands it a flattened copy
//! of every visible variable and receives an [`ActionResult`] back; it never
//! looks inside the action beyond that.

use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::listener::panic_message;
use crate::variables::VariableMap;

use super::context::{ContextOptions, ExecutionContext};

/// Fault raised by an action instead of returning a result.
pub type ActionError = Box<dyn Error + Send + Sync>;

/// Outcome of one action invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    /// Output variables, written back into the workflow scope on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<VariableMap>,
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    /// Replaces the output mapping.
    pub fn with_data(mut self, data: VariableMap) -> Self {
        self.data = Some(data);
        self
    }

    /// Adds a single output variable.
    pub fn with_output(mut self, name: impl Into<String>, value: Value) -> Self {
        self.data
            .get_or_insert_with(VariableMap::new)
            .insert(name.into(), value);
        self
    }

    pub fn outputs(&self) -> Option<&VariableMap> {
        self.data.as_ref()
    }
}

/// A unit of work the engine can run.
pub trait Action: Send + Sync {
    /// Display name used in events and logs.
    fn name(&self) -> &str;

    /// Runs the action against a flattened view of the run's variables.
    fn execute(&self, variables: &VariableMap) -> Result<ActionResult, ActionError>;
}

/// Adapts a closure into an [`Action`].
pub struct FnAction<F> {
    name: String,
    func: F,
}

impl<F> FnAction<F>
where
    F: Fn(&VariableMap) -> Result<ActionResult, ActionError> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Action for FnAction<F>
where
    F: Fn(&VariableMap) -> Result<ActionResult, ActionError> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, variables: &VariableMap) -> Result<ActionResult, ActionError> {
        (self.func)(variables)
    }
}

impl<F> fmt::Debug for FnAction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAction").field("name", &self.name).finish()
    }
}

/// Shorthand for building a shared closure action.
pub fn action_fn<F>(name: impl Into<String>, func: F) -> Arc<dyn Action>
where
    F: Fn(&VariableMap) -> Result<ActionResult, ActionError> + Send + Sync + 'static,
{
    Arc::new(FnAction::new(name, func))
}

/// Context handed to the engine: a prepared context or plain variables.
#[derive(Debug, Clone)]
pub enum ContextSource {
    Context(Arc<ExecutionContext>),
    Variables(VariableMap),
}

impl ContextSource {
    /// Resolves to a context, building a fresh one around plain variables.
    pub(crate) fn into_context(self, options: ContextOptions) -> Arc<ExecutionContext> {
        match self {
            Self::Context(context) => context,
            Self::Variables(variables) => ExecutionContext::from_variables(&variables, options),
        }
    }
}

impl From<Arc<ExecutionContext>> for ContextSource {
    fn from(context: Arc<ExecutionContext>) -> Self {
        Self::Context(context)
    }
}

impl From<&Arc<ExecutionContext>> for ContextSource {
    fn from(context: &Arc<ExecutionContext>) -> Self {
        Self::Context(Arc::clone(context))
    }
}

impl From<VariableMap> for ContextSource {
    fn from(variables: VariableMap) -> Self {
        Self::Variables(variables)
    }
}

/// Invokes `action`, folding returned faults and panics into failures.
pub(crate) fn invoke_action(action: &dyn Action, variables: &VariableMap) -> ActionResult {
    let name = action.name().to_string();
    debug!("Executing action '{}'", name);

    match panic::catch_unwind(AssertUnwindSafe(|| action.execute(variables))) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("Action '{}' raised an error: {}", name, e);
            ActionResult::failure(format!("Action '{}' raised an error: {}", name, e))
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            error!("Action '{}' panicked: {}", name, reason);
            ActionResult::failure(format!("Action '{}' panicked: {}", name, reason))
        }
    }
}
