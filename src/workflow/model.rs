//! Workflow Data Model
//!
//! Actions described as data, so workflows can be assembled from files.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: login_check
//! variables:
//!   user: alice
//! steps:
//!   - type: set_variable
//!     name: remember_host
//!     params:
//!       name: host
//!       value: example.org
//!
//!   - type: log
//!     params:
//!       message: "Checking {user} on {host}"
//!
//!   - type: assert_equals
//!     params:
//!       name: user
//!       value: alice
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::variables::VariableMap;

/// One action described as data: a type tag plus free-form parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActionSpec {
    /// Registry tag selecting the factory
    #[serde(rename = "type")]
    pub action_type: String,

    /// Display name; defaults to the type tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "VariableMap::is_empty")]
    pub params: VariableMap,
}

impl ActionSpec {
    /// Creates a spec with no name and no parameters.
    ///
    /// # Example
    ///
    /// ```
    /// use actionrunner::workflow::ActionSpec;
    /// use serde_json::json;
    ///
    /// let spec = ActionSpec::new("set_variable")
    ///     .with_name("init")
    ///     .with_param("name", json!("user"))
    ///     .with_param("value", json!("alice"));
    /// assert_eq!(spec.display_name(), "init");
    /// ```
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into().trim().to_string(),
            name: None,
            params: VariableMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Name used in events and logs.
    pub fn display_name(&self) -> &str {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.action_type,
        }
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// An ordered list of action specs with optional seed variables.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct WorkflowDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Seed values, placed in the global scope of the run's context
    #[serde(default, skip_serializing_if = "VariableMap::is_empty")]
    pub variables: VariableMap,

    #[serde(default)]
    pub steps: Vec<ActionSpec>,
}

impl WorkflowDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn add_step(&mut self, step: ActionSpec) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Distinct type tags used by the steps, sorted.
    pub fn action_types(&self) -> BTreeSet<&str> {
        self.steps.iter().map(|s| s.action_type.as_str()).collect()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed workflow")
    }
}
