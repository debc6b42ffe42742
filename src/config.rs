//! Engine Configuration
//!
//! YAML-backed settings for [`WorkflowEngine`](crate::WorkflowEngine).
//! Every field has a default, so an empty document is a valid config.
//!
//! ```yaml
//! worker_threads: 4
//! max_retained_runs: 64
//! context:
//!   inherit_variables: true
//!   track_history: true
//!   max_history: 200
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::execution::context::ContextOptions;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "ACTIONRUNNER_CONFIG";

/// File name looked up next to the executable and in the working directory.
pub const CONFIG_FILE_NAME: &str = "actionrunner.yaml";

/// Config file found at startup, if any.
pub static DEFAULT_CONFIG_PATH: Lazy<Option<PathBuf>> = Lazy::new(|| {
    // Priority 1: explicit environment override
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("Using config from {}: {}", CONFIG_ENV_VAR, path.display());
            return Some(path);
        }
    }

    // Priority 2: next to the executable
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let path = exe_dir.join(CONFIG_FILE_NAME);
            if path.exists() {
                return Some(path);
            }
        }
    }

    // Priority 3: working directory
    let path = PathBuf::from(CONFIG_FILE_NAME);
    path.exists().then_some(path)
});

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Threads in the continuation pool
    pub worker_threads: usize,
    /// Finished run records kept before the oldest are evicted
    pub max_retained_runs: usize,
    /// Options for contexts the engine creates itself
    pub context: ContextOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get().max(1),
            max_retained_runs: 64,
            context: ContextOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Reads and validates a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        debug!("Config loaded from {} ({} bytes)", path.display(), content.len());
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit, not as an empty mapping
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads the discovered config file, or falls back to defaults.
    pub fn discover() -> Result<Self, ConfigError> {
        match DEFAULT_CONFIG_PATH.as_ref() {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.context.track_history && self.context.max_history == 0 {
            return Err(ConfigError::Invalid(
                "context.max_history must be at least 1 when history is tracked".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_max_retained_runs(mut self, runs: usize) -> Self {
        self.max_retained_runs = runs;
        self
    }

    pub fn with_context(mut self, context: ContextOptions) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.worker_threads >= 1);
        assert_eq!(config.max_retained_runs, 64);
        assert!(config.context.inherit_variables);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = EngineConfig::from_yaml("max_retained_runs: 3\n").unwrap();
        assert_eq!(config.max_retained_runs, 3);
        assert!(config.worker_threads >= 1);
        assert!(!config.context.track_history);
    }

    #[test]
    fn test_empty_yaml() {
        let config = EngineConfig::from_yaml("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_nested_context_options() {
        let yaml = "context:\n  track_history: true\n  max_history: 5\n";
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert!(config.context.track_history);
        assert_eq!(config.context.max_history, 5);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = EngineConfig::from_yaml("worker_threads: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_history_when_tracking() {
        let config = EngineConfig::default().with_context(ContextOptions {
            track_history: true,
            max_history: 0,
            ..ContextOptions::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        let err = EngineConfig::from_yaml("worker_threads: [1, 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        fs::write(&path, "worker_threads: 2\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.worker_threads, 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/nonexistent/actionrunner.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/actionrunner.yaml"));
    }
}
