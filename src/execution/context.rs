//! Execution Context
//!
//! Bundles a variable store and a state machine for one run. Contexts nest:
//! a child holds a strong handle to its parent (for inherited lookups) and
//! the parent holds weak handles to its live children, so disposing or
//! dropping a tree never leaks through a reference cycle.
//!
//! # Example
//!
//! ```
//! use actionrunner::execution::{ContextOptions, ExecutionContext};
//! use serde_json::json;
//!
//! let root = ExecutionContext::new();
//! root.variables().set("user", json!("alice")).unwrap();
//!
//! let child = root.create_child(ContextOptions::default());
//! assert_eq!(child.variables().get("user", json!(null)), json!("alice"));
//!
//! root.dispose();
//! assert!(child.is_disposed());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ContextError, StateError, VariableError};
use crate::variables::{ScopedVariables, VariableChange, VariableMap, VariableScope, VariableStore};

use super::state::{ExecutionState, ExecutionStateMachine, StateChange, StateSnapshot};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_context_id() -> String {
    format!(
        "ctx-{}-{}",
        Utc::now().timestamp_millis(),
        NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)
    )
}

/// Construction flags for a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    /// Fall back to the parent's variables on lookup misses
    pub inherit_variables: bool,
    /// Record variable and state changes for diagnostics
    pub track_history: bool,
    /// Maximum entries kept per history; oldest are dropped first
    pub max_history: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            inherit_variables: true,
            track_history: false,
            max_history: 100,
        }
    }
}

impl ContextOptions {
    /// Default options with history tracking switched on.
    pub fn with_history(max_history: usize) -> Self {
        Self {
            track_history: true,
            max_history,
            ..Self::default()
        }
    }
}

/// Bounded variable and state change logs.
#[derive(Debug, Clone, Default)]
struct ContextHistory {
    variables: VecDeque<VariableChange>,
    states: VecDeque<StateChange>,
    max: usize,
}

impl ContextHistory {
    fn new(max: usize) -> Self {
        Self {
            max,
            ..Self::default()
        }
    }

    fn record_variable(&mut self, change: &VariableChange) {
        push_bounded(&mut self.variables, change.clone(), self.max);
    }

    fn record_state(&mut self, change: &StateChange) {
        push_bounded(&mut self.states, change.clone(), self.max);
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

/// Serializable form of a context (parent and children excluded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub id: String,
    pub state: StateSnapshot,
    pub variables: ScopedVariables,
    #[serde(default)]
    pub options: ContextOptions,
}

/// A cloned context together with its cloned descendants (depth-first).
#[derive(Debug)]
pub struct ContextTree {
    pub root: Arc<ExecutionContext>,
    pub descendants: Vec<Arc<ExecutionContext>>,
}

/// Per-run bundle of variable storage and lifecycle state.
pub struct ExecutionContext {
    id: String,
    options: ContextOptions,
    variables: Arc<VariableStore>,
    state: ExecutionStateMachine,
    parent: Mutex<Option<Arc<ExecutionContext>>>,
    children: Mutex<Vec<Weak<ExecutionContext>>>,
    history: Arc<Mutex<ContextHistory>>,
    disposed: AtomicBool,
}

impl ExecutionContext {
    /// Creates a root context with default options.
    pub fn new() -> Arc<Self> {
        Self::with_options(ContextOptions::default())
    }

    /// Creates a root context.
    pub fn with_options(options: ContextOptions) -> Arc<Self> {
        Self::assemble(
            next_context_id(),
            options,
            VariableStore::new(),
            ExecutionStateMachine::new(),
            None,
            ContextHistory::new(options.max_history),
        )
    }

    /// Creates a root context whose workflow scope holds `variables`.
    ///
    /// Entries with invalid names are skipped with a warning.
    pub fn from_variables(variables: &VariableMap, options: ContextOptions) -> Arc<Self> {
        let context = Self::with_options(options);
        context.absorb_outputs(variables);
        context
    }

    fn assemble(
        id: String,
        options: ContextOptions,
        variables: VariableStore,
        state: ExecutionStateMachine,
        parent: Option<Arc<ExecutionContext>>,
        history: ContextHistory,
    ) -> Arc<Self> {
        let history = Arc::new(Mutex::new(history));
        let variables = Arc::new(variables);

        if options.track_history {
            let sink = Arc::clone(&history);
            variables.add_listener(move |change| sink.lock().record_variable(change));

            let sink = Arc::clone(&history);
            state.add_listener(move |change| sink.lock().record_state(change));
        }

        Arc::new(Self {
            id,
            options,
            variables,
            state,
            parent: Mutex::new(parent),
            children: Mutex::new(Vec::new()),
            history,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> ContextOptions {
        self.options
    }

    /// The context's own variable store.
    pub fn variables(&self) -> &Arc<VariableStore> {
        &self.variables
    }

    pub fn state_machine(&self) -> &ExecutionStateMachine {
        &self.state
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ExecutionState {
        self.state.state()
    }

    /// Moves the state machine; see [`ExecutionStateMachine::transition_to`].
    pub fn transition_to(&self, to: ExecutionState) -> Result<StateChange, StateError> {
        self.state.transition_to(to)
    }

    /// Visible value of `name`, falling back to `default`.
    pub fn get(&self, name: &str, default: Value) -> Value {
        self.variables.get(name, default)
    }

    /// Writes `name` into the workflow scope.
    pub fn set(&self, name: &str, value: Value) -> Result<(), VariableError> {
        self.variables.set(name, value)
    }

    /// Every visible variable flattened into one mapping.
    pub fn flatten(&self) -> VariableMap {
        self.variables.get_all(None)
    }

    pub fn parent(&self) -> Option<Arc<ExecutionContext>> {
        self.parent.lock().clone()
    }

    /// Live children, in creation order.
    pub fn children(&self) -> Vec<Arc<ExecutionContext>> {
        self.children.lock().iter().filter_map(Weak::upgrade).collect()
    }

    /// Creates a child context parented to this one.
    pub fn create_child(self: &Arc<Self>, options: ContextOptions) -> Arc<ExecutionContext> {
        let variables = if options.inherit_variables {
            VariableStore::with_parent(Arc::clone(&self.variables))
        } else {
            VariableStore::new()
        };

        let child = Self::assemble(
            next_context_id(),
            options,
            variables,
            ExecutionStateMachine::new(),
            Some(Arc::clone(self)),
            ContextHistory::new(options.max_history),
        );

        self.register_child(&child);
        debug!("Context '{}' created child '{}'", self.id, child.id);
        child
    }

    fn register_child(&self, child: &Arc<ExecutionContext>) {
        let mut children = self.children.lock();
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(child));
    }

    /// Detaches from the parent, clears this context's variables and
    /// disposes every child. Calling it again is a no-op.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(parent) = self.parent.lock().take() {
            let me: *const ExecutionContext = self;
            parent
                .children
                .lock()
                .retain(|weak| weak.strong_count() > 0 && !std::ptr::eq(weak.as_ptr(), me));
        }
        self.variables.detach_parent();
        self.variables.clear_all();

        let children: Vec<Weak<ExecutionContext>> = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.dispose();
        }

        debug!("Context '{}' disposed", self.id);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Deep copy of variables and state under a new id, attached to the same
    /// parent. With `include_children`, live children are copied too and
    /// reparented under the copy.
    ///
    /// Parents only hold weak handles to children, so the returned tree owns
    /// the copied descendants; drop it and they go away.
    pub fn deep_clone(&self, include_children: bool) -> ContextTree {
        let parent = self.parent();
        let root = self.clone_under(parent.as_ref());

        let mut descendants = Vec::new();
        if include_children {
            self.clone_children_into(&root, &mut descendants);
        }

        ContextTree { root, descendants }
    }

    fn clone_under(&self, parent: Option<&Arc<ExecutionContext>>) -> Arc<ExecutionContext> {
        let inherited = self.variables.parent().is_some();
        let store_parent = match parent {
            Some(parent) if inherited => Some(Arc::clone(&parent.variables)),
            _ => None,
        };

        let copy = Self::assemble(
            next_context_id(),
            self.options,
            self.variables.clone_with_parent(store_parent),
            self.state.clone(),
            parent.cloned(),
            self.history.lock().clone(),
        );

        if let Some(parent) = parent {
            parent.register_child(&copy);
        }
        copy
    }

    fn clone_children_into(&self, target: &Arc<ExecutionContext>, out: &mut Vec<Arc<ExecutionContext>>) {
        for child in self.children() {
            let child_copy = child.clone_under(Some(target));
            out.push(Arc::clone(&child_copy));
            child.clone_children_into(&child_copy, out);
        }
    }

    /// Variable changes recorded so far, oldest first.
    pub fn variable_history(&self) -> Vec<VariableChange> {
        self.history.lock().variables.iter().cloned().collect()
    }

    /// State transitions recorded so far, oldest first.
    pub fn state_history(&self) -> Vec<StateChange> {
        self.history.lock().states.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            id: self.id.clone(),
            state: self.state.snapshot(),
            variables: self.variables.snapshot(),
            options: self.options,
        }
    }

    /// Serializes id, state, own variables and options.
    pub fn to_dict(&self) -> Value {
        serde_json::to_value(self.snapshot()).unwrap_or(Value::Null)
    }

    /// Rebuilds a parentless context from [`to_dict`](Self::to_dict) output.
    pub fn from_dict(value: &Value) -> Result<Arc<ExecutionContext>, ContextError> {
        let snapshot = ContextSnapshot::deserialize(value)?;
        Self::from_snapshot(snapshot)
    }

    pub fn from_snapshot(snapshot: ContextSnapshot) -> Result<Arc<ExecutionContext>, ContextError> {
        let variables = VariableStore::from_scoped(snapshot.variables)?;
        let state = ExecutionStateMachine::from_snapshot(snapshot.state);

        Ok(Self::assemble(
            snapshot.id,
            snapshot.options,
            variables,
            state,
            None,
            ContextHistory::new(snapshot.options.max_history),
        ))
    }

    /// Writes `outputs` into the workflow scope, skipping invalid names.
    pub(crate) fn absorb_outputs(&self, outputs: &VariableMap) {
        for (name, value) in outputs {
            if let Err(e) = self.variables.set_in(name, value.clone(), VariableScope::Workflow) {
                warn!("Context '{}': ignoring action output: {}", self.id, e);
            }
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("variables", &self.variables.len())
            .field("children", &self.children().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_context_is_pending() {
        let context = ExecutionContext::new();
        assert_eq!(context.state(), ExecutionState::Pending);
        assert!(context.parent().is_none());
        assert!(context.id().starts_with("ctx-"));
    }

    #[test]
    fn test_from_variables_skips_invalid_names() {
        let mut variables = VariableMap::new();
        variables.insert("good".to_string(), json!(1));
        variables.insert("bad name".to_string(), json!(2));

        let options = ContextOptions {
            track_history: true,
            ..ContextOptions::default()
        };
        let context = ExecutionContext::from_variables(&variables, options);
        assert_eq!(context.get("good", json!(null)), json!(1));
        assert_eq!(context.variables().len(), 1);
        assert!(context.options().track_history);
    }

    #[test]
    fn test_child_inherits_variables() {
        let root = ExecutionContext::new();
        root.set("shared", json!("root")).unwrap();

        let child = root.create_child(ContextOptions::default());
        assert_eq!(child.get("shared", json!(null)), json!("root"));

        child.set("shared", json!("child")).unwrap();
        assert_eq!(child.get("shared", json!(null)), json!("child"));
        assert_eq!(root.get("shared", json!(null)), json!("root"));
        assert_eq!(root.children().len(), 1);
    }

    #[test]
    fn test_isolated_child_does_not_inherit() {
        let root = ExecutionContext::new();
        root.set("shared", json!("root")).unwrap();

        let options = ContextOptions {
            inherit_variables: false,
            ..ContextOptions::default()
        };
        let child = root.create_child(options);

        assert!(!child.variables().has("shared", None));
        assert!(Arc::ptr_eq(&child.parent().unwrap(), &root));
    }

    #[test]
    fn test_dispose_cascades_and_is_idempotent() {
        let root = ExecutionContext::new();
        let child = root.create_child(ContextOptions::default());
        let grandchild = child.create_child(ContextOptions::default());
        child.set("x", json!(1)).unwrap();
        grandchild.set("y", json!(2)).unwrap();

        root.dispose();
        root.dispose();

        assert!(root.is_disposed());
        assert!(child.is_disposed());
        assert!(grandchild.is_disposed());
        assert!(child.variables().is_empty());
        assert!(grandchild.variables().is_empty());
        assert!(root.children().is_empty());
    }

    #[test]
    fn test_dispose_child_detaches_from_parent() {
        let root = ExecutionContext::new();
        root.set("x", json!("root")).unwrap();
        let child = root.create_child(ContextOptions::default());
        let sibling = root.create_child(ContextOptions::default());

        child.dispose();

        assert!(child.parent().is_none());
        assert!(!child.variables().has("x", None));
        assert_eq!(root.children().len(), 1);
        assert!(Arc::ptr_eq(&root.children()[0], &sibling));
        assert_eq!(root.get("x", json!(null)), json!("root"));
    }

    #[test]
    fn test_dropped_children_are_not_reported() {
        let root = ExecutionContext::new();
        {
            let _child = root.create_child(ContextOptions::default());
            assert_eq!(root.children().len(), 1);
        }
        assert!(root.children().is_empty());
    }

    #[test]
    fn test_deep_clone_copies_variables_and_state() {
        let root = ExecutionContext::new();
        root.set("x", json!({"a": 1})).unwrap();
        root.transition_to(ExecutionState::Running).unwrap();

        let copy = root.deep_clone(false).root;
        copy.set("x", json!({"a": 2})).unwrap();

        assert_ne!(copy.id(), root.id());
        assert_eq!(copy.state(), ExecutionState::Running);
        assert_eq!(root.get("x", json!(null)), json!({"a": 1}));
        assert!(copy.children().is_empty());
    }

    #[test]
    fn test_deep_clone_with_children_reparents() {
        let root = ExecutionContext::new();
        root.set("origin", json!("root")).unwrap();
        let child = root.create_child(ContextOptions::default());
        child.set("own", json!("child")).unwrap();

        let tree = root.deep_clone(true);
        let copy = &tree.root;
        copy.set("origin", json!("copy")).unwrap();

        let copied_children = copy.children();
        assert_eq!(copied_children.len(), 1);
        assert_eq!(tree.descendants.len(), 1);

        let copied_child = &copied_children[0];
        assert!(Arc::ptr_eq(&copied_child.parent().unwrap(), copy));
        assert_eq!(copied_child.get("own", json!(null)), json!("child"));
        assert_eq!(copied_child.get("origin", json!(null)), json!("copy"));
        assert_eq!(child.get("origin", json!(null)), json!("root"));
    }

    #[test]
    fn test_history_is_bounded() {
        let context = ExecutionContext::with_options(ContextOptions::with_history(3));
        for i in 0..5 {
            context.set("counter", json!(i)).unwrap();
        }
        context.transition_to(ExecutionState::Running).unwrap();

        let history = context.variable_history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].new_value, Some(json!(2)));
        assert_eq!(history[2].new_value, Some(json!(4)));

        let states = context.state_history();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].new_state, ExecutionState::Running);
    }

    #[test]
    fn test_history_disabled_by_default() {
        let context = ExecutionContext::new();
        context.set("x", json!(1)).unwrap();
        assert!(context.variable_history().is_empty());
    }

    #[test]
    fn test_dict_roundtrip() {
        let context = ExecutionContext::new();
        context
            .variables()
            .set_in("g", json!("global"), VariableScope::Global)
            .unwrap();
        context.set("w", json!([1, 2])).unwrap();
        context
            .variables()
            .set_in("l", json!({"k": true}), VariableScope::Local)
            .unwrap();
        context.transition_to(ExecutionState::Running).unwrap();

        let dict = context.to_dict();
        let restored = ExecutionContext::from_dict(&dict).unwrap();

        assert_eq!(restored.id(), context.id());
        assert_eq!(restored.state(), ExecutionState::Running);
        assert_eq!(restored.variables().snapshot(), context.variables().snapshot());
        assert_eq!(restored.flatten(), context.flatten());
    }

    #[test]
    fn test_from_dict_rejects_invalid_variable_name() {
        let value = json!({
            "id": "ctx-test",
            "state": {"state": "pending", "updated_at": "2024-01-01T00:00:00Z"},
            "variables": {"workflow": {"not valid": 1}}
        });
        assert!(matches!(
            ExecutionContext::from_dict(&value),
            Err(ContextError::Variable(_))
        ));
    }

    #[test]
    fn test_absorb_outputs_skips_invalid_names() {
        let context = ExecutionContext::new();
        let mut outputs = VariableMap::new();
        outputs.insert("result".to_string(), json!(42));
        outputs.insert("9lives".to_string(), json!(9));

        context.absorb_outputs(&outputs);
        assert_eq!(context.get("result", json!(null)), json!(42));
        assert_eq!(context.variables().get_scope("result"), Some(VariableScope::Workflow));
        assert!(!context.variables().has("9lives", None));
    }
}
