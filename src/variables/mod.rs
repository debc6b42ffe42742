//! Scoped Variables Module
//!
//! Provides the hierarchical, scope-aware variable namespace threaded
//! through every action invocation.
//!
//! # Structure
//!
//! - [`scope`]: The Global / Workflow / Local namespaces
//! - [`store`]: Scoped store with parent fallback and change notification

pub mod scope;
pub mod store;

pub use scope::VariableScope;
pub use store::{
    is_valid_name, validate_name, ScopedVariables, VariableChange, VariableMap, VariableStore,
};
