//! Action Registry
//!
//! Maps type tags to factories that turn an [`ActionSpec`] into an action.
//! Registries are plain values: build one, register what you need and pass
//! it to whatever assembles action lists.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::error::RegistryError;
use crate::execution::Action;

use super::builtin;
use super::model::ActionSpec;

/// Builds an action from its spec, or rejects the parameters.
pub type ActionFactory =
    Arc<dyn Fn(&ActionSpec) -> Result<Arc<dyn Action>, RegistryError> + Send + Sync>;

/// Tag-to-factory table.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    factories: BTreeMap<String, ActionFactory>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in action types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry);
        registry
    }

    /// Registers `factory` under `tag`.
    ///
    /// Tags are trimmed; empty and already registered tags are rejected.
    pub fn register<F>(&mut self, tag: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&ActionSpec) -> Result<Arc<dyn Action>, RegistryError> + Send + Sync + 'static,
    {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(RegistryError::EmptyTag);
        }
        if self.factories.contains_key(tag) {
            return Err(RegistryError::DuplicateTag(tag.to_string()));
        }

        debug!("Registered action type '{}'", tag);
        self.factories.insert(tag.to_string(), Arc::new(factory));
        Ok(())
    }

    pub fn unregister(&mut self, tag: &str) -> bool {
        self.factories.remove(tag.trim()).is_some()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag.trim())
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Builds one action.
    pub fn create(&self, spec: &ActionSpec) -> Result<Arc<dyn Action>, RegistryError> {
        let tag = spec.action_type.trim();
        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| RegistryError::UnknownTag(tag.to_string()))?;
        factory(spec)
    }

    /// Builds every action in order, stopping at the first rejection.
    pub fn build_all(&self, specs: &[ActionSpec]) -> Result<Vec<Arc<dyn Action>>, RegistryError> {
        specs.iter().map(|spec| self.create(spec)).collect()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
