//! Variable Scopes

use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace a variable lives in.
///
/// Reads search `Local`, then `Workflow`, then `Global`. Writes default to
/// `Workflow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    Global,
    #[default]
    Workflow,
    Local,
}

impl VariableScope {
    /// Scopes in read-precedence order, highest first.
    pub const LOOKUP_ORDER: [VariableScope; 3] = [
        VariableScope::Local,
        VariableScope::Workflow,
        VariableScope::Global,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Workflow => "workflow",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for VariableScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
