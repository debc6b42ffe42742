//! Workflow Parser
//!
//! Loads workflow definitions from YAML and validates their structure.
//! Loading is read-only; definitions are never written back.

use std::fmt;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use crate::error::WorkflowLoadError;
use crate::variables::is_valid_name;

use super::model::WorkflowDefinition;

/// Structural problems found in a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyWorkflow,
    /// Step at this index has an empty type tag
    EmptyActionType(usize),
    InvalidVariableName(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyWorkflow => write!(f, "Workflow has no steps"),
            Self::EmptyActionType(index) => write!(f, "Step {} has no action type", index),
            Self::InvalidVariableName(name) => {
                write!(f, "Initial variable '{}' has an invalid name", name)
            }
        }
    }
}

/// Loads and validates a workflow file.
///
/// # Example
///
/// ```rust,no_run
/// use actionrunner::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let definition = load_workflow("login_check.yaml")?;
///     println!("Loaded {} steps", definition.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: impl AsRef<Path>) -> Result<WorkflowDefinition, WorkflowLoadError> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|source| WorkflowLoadError::Read {
        path: path.display().to_string(),
        source,
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());
    parse_workflow(&yaml_content)
}

/// Parses and validates a workflow document.
pub fn parse_workflow(yaml_content: &str) -> Result<WorkflowDefinition, WorkflowLoadError> {
    let definition: WorkflowDefinition = serde_yaml::from_str(yaml_content)?;

    info!(
        "Parsed workflow '{}': {} steps, {} action types",
        definition.display_name(),
        definition.len(),
        definition.action_types().len()
    );

    validate_definition(&definition).map_err(WorkflowLoadError::Invalid)?;
    Ok(definition)
}

/// Checks a definition, collecting every problem found.
pub fn validate_definition(definition: &WorkflowDefinition) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if definition.steps.is_empty() {
        errors.push(ValidationError::EmptyWorkflow);
    }

    for (index, step) in definition.steps.iter().enumerate() {
        if step.action_type.trim().is_empty() {
            errors.push(ValidationError::EmptyActionType(index));
        }
    }

    let mut names: Vec<&String> = definition.variables.keys().collect();
    names.sort();
    for name in names {
        if !is_valid_name(name) {
            errors.push(ValidationError::InvalidVariableName(name.clone()));
        }
    }

    // Display names only label events, so repeats are allowed
    let mut seen = std::collections::HashSet::new();
    for step in &definition.steps {
        if !seen.insert(step.display_name()) {
            warn!("Step name '{}' is used more than once", step.display_name());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
