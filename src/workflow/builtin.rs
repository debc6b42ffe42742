//! Built-in Actions
//!
//! Small general-purpose actions available to workflow files:
//!
//! | type            | params                 | effect                               |
//! |-----------------|------------------------|--------------------------------------|
//! | `set_variable`  | `name`, `value`        | outputs `{name: value}`              |
//! | `log`           | `message`              | logs the message with `{var}` filled |
//! | `sleep`         | `millis`               | blocks for the given time            |
//! | `fail`          | `message` (optional)   | always fails                         |
//! | `assert_equals` | `name`, `value`        | fails unless the variable matches    |
//! | `copy_variable` | `from`, `to`           | outputs `{to: value_of(from)}`       |

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::RegistryError;
use crate::execution::{Action, ActionError, ActionResult};
use crate::variables::{is_valid_name, VariableMap};

use super::model::ActionSpec;
use super::registry::ActionRegistry;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid"));

/// Adds every built-in type to `registry`, skipping tags already taken.
pub fn register_builtins(registry: &mut ActionRegistry) {
    let builtins: [(&str, fn(&ActionSpec) -> Result<Arc<dyn Action>, RegistryError>); 6] = [
        ("set_variable", SetVariable::from_spec),
        ("log", LogMessage::from_spec),
        ("sleep", Sleep::from_spec),
        ("fail", Fail::from_spec),
        ("assert_equals", AssertEquals::from_spec),
        ("copy_variable", CopyVariable::from_spec),
    ];

    for (tag, factory) in builtins {
        if let Err(e) = registry.register(tag, factory) {
            log::warn!("Built-in action not registered: {}", e);
        }
    }
}

/// Replaces `{name}` placeholders with variable values.
///
/// Strings are inserted without quotes; unknown placeholders are kept.
pub fn render_template(template: &str, variables: &VariableMap) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match variables.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn required_param<'a>(spec: &'a ActionSpec, key: &str) -> Result<&'a Value, RegistryError> {
    spec.param(key).ok_or_else(|| {
        RegistryError::invalid_params(&spec.action_type, format!("missing '{}'", key))
    })
}

fn required_str(spec: &ActionSpec, key: &str) -> Result<String, RegistryError> {
    match required_param(spec, key)? {
        Value::String(s) => Ok(s.clone()),
        _ => Err(RegistryError::invalid_params(
            &spec.action_type,
            format!("'{}' must be a string", key),
        )),
    }
}

fn required_variable_name(spec: &ActionSpec, key: &str) -> Result<String, RegistryError> {
    let name = required_str(spec, key)?;
    if !is_valid_name(&name) {
        return Err(RegistryError::invalid_params(
            &spec.action_type,
            format!("'{}' is not a valid variable name", name),
        ));
    }
    Ok(name)
}

/// Outputs a constant value under a variable name.
#[derive(Debug)]
pub struct SetVariable {
    label: String,
    variable: String,
    value: Value,
}

impl SetVariable {
    fn from_spec(spec: &ActionSpec) -> Result<Arc<dyn Action>, RegistryError> {
        Ok(Arc::new(Self {
            label: spec.display_name().to_string(),
            variable: required_variable_name(spec, "name")?,
            value: required_param(spec, "value")?.clone(),
        }))
    }
}

impl Action for SetVariable {
    fn name(&self) -> &str {
        &self.label
    }

    fn execute(&self, _variables: &VariableMap) -> Result<ActionResult, ActionError> {
        Ok(ActionResult::success(format!("Set '{}'", self.variable))
            .with_output(self.variable.clone(), self.value.clone()))
    }
}

/// Logs a rendered message.
#[derive(Debug)]
pub struct LogMessage {
    label: String,
    template: String,
}

impl LogMessage {
    fn from_spec(spec: &ActionSpec) -> Result<Arc<dyn Action>, RegistryError> {
        Ok(Arc::new(Self {
            label: spec.display_name().to_string(),
            template: required_str(spec, "message")?,
        }))
    }
}

impl Action for LogMessage {
    fn name(&self) -> &str {
        &self.label
    }

    fn execute(&self, variables: &VariableMap) -> Result<ActionResult, ActionError> {
        let message = render_template(&self.template, variables);
        info!("{}", message);
        Ok(ActionResult::success(message))
    }
}

/// Blocks the run for a fixed time.
#[derive(Debug)]
pub struct Sleep {
    label: String,
    duration: Duration,
}

impl Sleep {
    fn from_spec(spec: &ActionSpec) -> Result<Arc<dyn Action>, RegistryError> {
        let millis = required_param(spec, "millis")?.as_u64().ok_or_else(|| {
            RegistryError::invalid_params(&spec.action_type, "'millis' must be a non-negative integer")
        })?;

        Ok(Arc::new(Self {
            label: spec.display_name().to_string(),
            duration: Duration::from_millis(millis),
        }))
    }
}

impl Action for Sleep {
    fn name(&self) -> &str {
        &self.label
    }

    fn execute(&self, _variables: &VariableMap) -> Result<ActionResult, ActionError> {
        thread::sleep(self.duration);
        Ok(ActionResult::success(format!("Slept {:?}", self.duration)))
    }
}

/// Always fails.
#[derive(Debug)]
pub struct Fail {
    label: String,
    message: String,
}

impl Fail {
    fn from_spec(spec: &ActionSpec) -> Result<Arc<dyn Action>, RegistryError> {
        Ok(Arc::new(Self {
            label: spec.display_name().to_string(),
            message: spec
                .str_param("message")
                .unwrap_or("Failed on purpose")
                .to_string(),
        }))
    }
}

impl Action for Fail {
    fn name(&self) -> &str {
        &self.label
    }

    fn execute(&self, variables: &VariableMap) -> Result<ActionResult, ActionError> {
        Ok(ActionResult::failure(render_template(&self.message, variables)))
    }
}

/// Fails unless a variable holds the expected value.
#[derive(Debug)]
pub struct AssertEquals {
    label: String,
    variable: String,
    expected: Value,
}

impl AssertEquals {
    fn from_spec(spec: &ActionSpec) -> Result<Arc<dyn Action>, RegistryError> {
        Ok(Arc::new(Self {
            label: spec.display_name().to_string(),
            variable: required_variable_name(spec, "name")?,
            expected: required_param(spec, "value")?.clone(),
        }))
    }
}

impl Action for AssertEquals {
    fn name(&self) -> &str {
        &self.label
    }

    fn execute(&self, variables: &VariableMap) -> Result<ActionResult, ActionError> {
        match variables.get(&self.variable) {
            Some(actual) if *actual == self.expected => Ok(ActionResult::success(format!(
                "'{}' equals {}",
                self.variable, self.expected
            ))),
            Some(actual) => Ok(ActionResult::failure(format!(
                "'{}' is {}, expected {}",
                self.variable, actual, self.expected
            ))),
            None => Ok(ActionResult::failure(format!(
                "'{}' is not set, expected {}",
                self.variable, self.expected
            ))),
        }
    }
}

/// Copies one variable's value to another name.
#[derive(Debug)]
pub struct CopyVariable {
    label: String,
    from: String,
    to: String,
}

impl CopyVariable {
    fn from_spec(spec: &ActionSpec) -> Result<Arc<dyn Action>, RegistryError> {
        Ok(Arc::new(Self {
            label: spec.display_name().to_string(),
            from: required_variable_name(spec, "from")?,
            to: required_variable_name(spec, "to")?,
        }))
    }
}

impl Action for CopyVariable {
    fn name(&self) -> &str {
        &self.label
    }

    fn execute(&self, variables: &VariableMap) -> Result<ActionResult, ActionError> {
        let value = variables
            .get(&self.from)
            .ok_or_else(|| format!("Variable '{}' is not set", self.from))?;

        Ok(ActionResult::success(format!("Copied '{}' to '{}'", self.from, self.to))
            .with_output(self.to.clone(), value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    fn build(spec: ActionSpec) -> Arc<dyn Action> {
        ActionRegistry::with_builtins().create(&spec).ok().unwrap()
    }

    fn vars(entries: &[(&str, Value)]) -> VariableMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_template() {
        let variables = vars(&[("user", json!("ada")), ("count", json!(3))]);

        assert_eq!(
            render_template("{user} has {count} items, {missing} stays", &variables),
            "ada has 3 items, {missing} stays"
        );
        assert_eq!(render_template("no placeholders", &variables), "no placeholders");
    }

    #[test]
    fn test_set_variable() {
        let action = build(
            ActionSpec::new("set_variable")
                .with_param("name", json!("limit"))
                .with_param("value", json!({"max": 5})),
        );

        let result = action.execute(&VariableMap::new()).unwrap();
        assert_eq!(result.outputs().unwrap()["limit"], json!({"max": 5}));
        assert_eq!(action.name(), "set_variable");
    }

    #[test]
    fn test_set_variable_rejects_bad_name() {
        let spec = ActionSpec::new("set_variable")
            .with_param("name", json!("bad name"))
            .with_param("value", json!(1));
        let err = ActionRegistry::with_builtins().create(&spec).err().unwrap();

        assert!(matches!(err, RegistryError::InvalidParams { .. }));
    }

    #[test]
    fn test_missing_param() {
        let err = ActionRegistry::with_builtins()
            .create(&ActionSpec::new("log"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("missing 'message'"));
    }

    #[test]
    fn test_log_renders_message() {
        let action = build(ActionSpec::new("log").with_param("message", json!("hi {user}")));
        let result = action.execute(&vars(&[("user", json!("bob"))])).unwrap();

        assert!(result.success);
        assert_eq!(result.message, "hi bob");
        assert!(result.outputs().is_none());
    }

    #[test]
    fn test_sleep() {
        let action = build(ActionSpec::new("sleep").with_param("millis", json!(20)));
        let started = Instant::now();

        assert!(action.execute(&VariableMap::new()).unwrap().success);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_sleep_rejects_negative() {
        let spec = ActionSpec::new("sleep").with_param("millis", json!(-5));
        assert!(ActionRegistry::with_builtins().create(&spec).is_err());
    }

    #[test]
    fn test_fail() {
        let action = build(ActionSpec::new("fail").with_param("message", json!("stop at {step}")));
        let result = action.execute(&vars(&[("step", json!(2))])).unwrap();

        assert!(!result.success);
        assert_eq!(result.message, "stop at 2");
    }

    #[test]
    fn test_assert_equals() {
        let action = build(
            ActionSpec::new("assert_equals")
                .with_param("name", json!("status"))
                .with_param("value", json!("ok")),
        );

        assert!(action.execute(&vars(&[("status", json!("ok"))])).unwrap().success);

        let mismatch = action.execute(&vars(&[("status", json!("down"))])).unwrap();
        assert!(!mismatch.success);
        assert!(mismatch.message.contains("expected"));

        assert!(!action.execute(&VariableMap::new()).unwrap().success);
    }

    #[test]
    fn test_copy_variable() {
        let action = build(
            ActionSpec::new("copy_variable")
                .with_param("from", json!("a"))
                .with_param("to", json!("b")),
        );

        let result = action.execute(&vars(&[("a", json!([1, 2]))])).unwrap();
        assert_eq!(result.outputs().unwrap()["b"], json!([1, 2]));

        assert!(action.execute(&VariableMap::new()).is_err());
    }

    #[test]
    fn test_existing_tags_are_kept() {
        let mut registry = ActionRegistry::new();
        registry
            .register("log", |spec| SetVariable::from_spec(spec))
            .unwrap();
        register_builtins(&mut registry);

        assert_eq!(registry.len(), 6);
    }
}
