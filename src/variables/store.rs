//! Scoped Variable Store
//!
//! Holds three scoped maps (global, workflow, local) and an optional parent
//! store consulted when a name is not found locally. Values handed out are
//! independent copies, so callers can never mutate stored state through a
//! returned value.
//!
//! # Example
//!
//! ```
//! use actionrunner::variables::{VariableScope, VariableStore};
//! use serde_json::json;
//!
//! let store = VariableStore::new();
//! store.set_in("user", json!("global-user"), VariableScope::Global).unwrap();
//! store.set("user", json!("workflow-user")).unwrap();
//!
//! assert_eq!(store.get("user", json!(null)), json!("workflow-user"));
//! assert_eq!(store.get_scope("user"), Some(VariableScope::Workflow));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VariableError;
use crate::listener::{ListenerId, ListenerList};

use super::scope::VariableScope;

/// Flat name -> value mapping.
pub type VariableMap = HashMap<String, Value>;

/// Pattern every variable name must match.
static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("variable name pattern is valid"));

/// Returns true if `name` is a legal variable name.
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

/// Validates a variable name.
pub fn validate_name(name: &str) -> Result<(), VariableError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(VariableError::InvalidName(name.to_string()))
    }
}

/// A single mutation of the store.
///
/// `new_value` is `None` when the variable was removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableChange {
    pub name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub scope: VariableScope,
    pub timestamp: DateTime<Utc>,
}

impl VariableChange {
    fn new(
        name: impl Into<String>,
        old_value: Option<Value>,
        new_value: Option<Value>,
        scope: VariableScope,
    ) -> Self {
        Self {
            name: name.into(),
            old_value,
            new_value,
            scope,
            timestamp: Utc::now(),
        }
    }

    /// Returns true if this change removed the variable.
    pub fn is_removal(&self) -> bool {
        self.new_value.is_none()
    }
}

/// Contents of the three scopes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopedVariables {
    #[serde(default)]
    pub global: VariableMap,
    #[serde(default)]
    pub workflow: VariableMap,
    #[serde(default)]
    pub local: VariableMap,
}

impl ScopedVariables {
    fn scope(&self, scope: VariableScope) -> &VariableMap {
        match scope {
            VariableScope::Global => &self.global,
            VariableScope::Workflow => &self.workflow,
            VariableScope::Local => &self.local,
        }
    }

    fn scope_mut(&mut self, scope: VariableScope) -> &mut VariableMap {
        match scope {
            VariableScope::Global => &mut self.global,
            VariableScope::Workflow => &mut self.workflow,
            VariableScope::Local => &mut self.local,
        }
    }

    /// Total number of entries across all scopes.
    pub fn len(&self) -> usize {
        self.global.len() + self.workflow.len() + self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scoped key/value store with parent fallback and change notification.
///
/// All methods take `&self`; the store is meant to be shared behind an
/// `Arc` between the engine, the running actions and observers.
pub struct VariableStore {
    scopes: RwLock<ScopedVariables>,
    parent: RwLock<Option<Arc<VariableStore>>>,
    listeners: ListenerList<VariableChange>,
}

impl VariableStore {
    /// Creates an empty, parentless store.
    pub fn new() -> Self {
        Self::from_parts(ScopedVariables::default(), None)
    }

    /// Creates an empty store that falls back to `parent` on lookup misses.
    pub fn with_parent(parent: Arc<VariableStore>) -> Self {
        Self::from_parts(ScopedVariables::default(), Some(parent))
    }

    fn from_parts(scopes: ScopedVariables, parent: Option<Arc<VariableStore>>) -> Self {
        Self {
            scopes: RwLock::new(scopes),
            parent: RwLock::new(parent),
            listeners: ListenerList::new(),
        }
    }

    /// Creates a parentless store pre-filled with `variables`.
    ///
    /// Names are validated; no change events are fired.
    pub fn from_scoped(variables: ScopedVariables) -> Result<Self, VariableError> {
        for scope in VariableScope::LOOKUP_ORDER {
            for name in variables.scope(scope).keys() {
                validate_name(name)?;
            }
        }

        Ok(Self::from_parts(variables, None))
    }

    /// Returns the parent store, if any.
    pub fn parent(&self) -> Option<Arc<VariableStore>> {
        self.parent.read().clone()
    }

    /// Stops falling back to the parent store.
    pub(crate) fn detach_parent(&self) -> Option<Arc<VariableStore>> {
        self.parent.write().take()
    }

    /// Copies this store's scopes under a different parent.
    pub(crate) fn clone_with_parent(&self, parent: Option<Arc<VariableStore>>) -> Self {
        Self::from_parts(self.snapshot(), parent)
    }

    /// Looks a name up through Local, Workflow, Global and then the parent.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        {
            let scopes = self.scopes.read();
            for scope in VariableScope::LOOKUP_ORDER {
                if let Some(value) = scopes.scope(scope).get(name) {
                    return Some(value.clone());
                }
            }
        }

        self.parent().and_then(|parent| parent.lookup(name))
    }

    /// Returns a copy of the visible value of `name`, or `default`.
    pub fn get(&self, name: &str, default: Value) -> Value {
        self.lookup(name).unwrap_or(default)
    }

    /// Sets `name` in the workflow scope.
    pub fn set(&self, name: &str, value: Value) -> Result<(), VariableError> {
        self.set_in(name, value, VariableScope::Workflow)
    }

    /// Sets `name` in an explicit scope.
    pub fn set_in(&self, name: &str, value: Value, scope: VariableScope) -> Result<(), VariableError> {
        validate_name(name)?;

        let old_value = self
            .scopes
            .write()
            .scope_mut(scope)
            .insert(name.to_string(), value.clone());

        debug!("Variable '{}' set in {} scope", name, scope);
        self.notify(VariableChange::new(name, old_value, Some(value), scope));
        Ok(())
    }

    /// Removes `name` from one scope, or from every scope of this store
    /// when `scope` is `None`. The parent is never touched.
    ///
    /// Returns true if anything was removed.
    pub fn delete(&self, name: &str, scope: Option<VariableScope>) -> bool {
        let targets: Vec<VariableScope> = match scope {
            Some(scope) => vec![scope],
            None => VariableScope::LOOKUP_ORDER.to_vec(),
        };

        let changes: Vec<VariableChange> = {
            let mut scopes = self.scopes.write();
            targets
                .into_iter()
                .filter_map(|target| {
                    scopes
                        .scope_mut(target)
                        .remove(name)
                        .map(|old| VariableChange::new(name, Some(old), None, target))
                })
                .collect()
        };

        let removed = !changes.is_empty();
        for change in changes {
            self.notify(change);
        }
        removed
    }

    /// Removes every entry from one scope.
    pub fn clear_scope(&self, scope: VariableScope) -> usize {
        let drained: Vec<(String, Value)> = self.scopes.write().scope_mut(scope).drain().collect();
        let count = drained.len();

        for (name, old) in drained {
            self.notify(VariableChange::new(name, Some(old), None, scope));
        }
        count
    }

    /// Removes every entry from every scope of this store.
    pub fn clear_all(&self) -> usize {
        VariableScope::LOOKUP_ORDER
            .iter()
            .map(|scope| self.clear_scope(*scope))
            .sum()
    }

    /// Returns a copy of one scope, or the merged visible view when `scope`
    /// is `None` (parent first, then Global, Workflow, Local overriding).
    pub fn get_all(&self, scope: Option<VariableScope>) -> VariableMap {
        if let Some(scope) = scope {
            return self.scopes.read().scope(scope).clone();
        }

        let mut merged = self
            .parent()
            .map(|parent| parent.get_all(None))
            .unwrap_or_default();

        let scopes = self.scopes.read();
        for scope in [VariableScope::Global, VariableScope::Workflow, VariableScope::Local] {
            merged.extend(
                scopes
                    .scope(scope)
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone())),
            );
        }
        merged
    }

    /// Copy of this store's own scopes, excluding the parent.
    pub fn snapshot(&self) -> ScopedVariables {
        self.scopes.read().clone()
    }

    /// Returns true if `name` is visible. With a scope, only that scope is
    /// checked here and in the parent chain.
    pub fn has(&self, name: &str, scope: Option<VariableScope>) -> bool {
        let found_here = {
            let scopes = self.scopes.read();
            match scope {
                Some(scope) => scopes.scope(scope).contains_key(name),
                None => VariableScope::LOOKUP_ORDER
                    .iter()
                    .any(|s| scopes.scope(*s).contains_key(name)),
            }
        };

        found_here || self.parent().map_or(false, |parent| parent.has(name, scope))
    }

    /// Returns the scope that would satisfy a read of `name`.
    pub fn get_scope(&self, name: &str) -> Option<VariableScope> {
        {
            let scopes = self.scopes.read();
            if let Some(scope) = VariableScope::LOOKUP_ORDER
                .iter()
                .find(|s| scopes.scope(**s).contains_key(name))
            {
                return Some(*scope);
            }
        }

        self.parent().and_then(|parent| parent.get_scope(name))
    }

    /// Number of entries held by this store (parent excluded).
    pub fn len(&self) -> usize {
        self.scopes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a change listener.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&VariableChange) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(listener))
    }

    /// Removes a change listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn notify(&self, change: VariableChange) {
        self.listeners.notify("Variable change", &change);
    }
}

impl Clone for VariableStore {
    /// Copies the scope contents and shares the parent. Listeners are not
    /// carried over.
    fn clone(&self) -> Self {
        self.clone_with_parent(self.parent())
    }
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableStore")
            .field("scopes", &*self.scopes.read())
            .field("has_parent", &self.parent.read().is_some())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
