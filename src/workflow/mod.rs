//! Workflow Definition Module
//!
//! Describes workflows as data and turns them into runnable actions.
//!
//! # Structure
//!
//! - [`model`]: Action specs and workflow definitions
//! - [`parser`]: YAML loading and validation
//! - [`registry`]: Type tag to factory mapping
//! - [`builtin`]: General-purpose built-in actions

pub mod builtin;
pub mod model;
pub mod parser;
pub mod registry;

pub use builtin::render_template;
pub use model::{ActionSpec, WorkflowDefinition};
pub use parser::{load_workflow, parse_workflow, validate_definition, ValidationError};
pub use registry::{ActionFactory, ActionRegistry};
