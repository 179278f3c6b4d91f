//! Runtime configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via HAREL_CONFIG or --config)
//! 3. Environment variables

use harel_core::{EngineConfig, ServiceErrorPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Resolution engine limits and policies.
    pub engine: EngineConfig,
    /// Service lifecycle configuration.
    pub services: ServicesConfig,
    /// Logging configuration.
    pub log: LogConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(std::env::var_os("HAREL_CONFIG").map(PathBuf::from))
    }

    /// Like [`Config::load`], with the config file path given explicitly.
    pub fn load_from(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from a variable lookup.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(max) = var("HAREL_MAX_MICROSTEPS") {
            if let Ok(n) = max.parse() {
                self.engine.max_microsteps = n;
            }
        }
        if let Some(policy) = var("HAREL_SERVICE_ERRORS") {
            match policy.parse::<ServiceErrorPolicy>() {
                Ok(p) => self.engine.service_errors = p,
                Err(e) => tracing::warn!("ignoring HAREL_SERVICE_ERRORS: {}", e),
            }
        }

        self.services.apply_overrides(&var);
        self.log.apply_overrides(&var);
    }

    /// Checks values that deserialize fine but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_microsteps == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_microsteps must be greater than 0".to_string(),
            ));
        }
        if self.log.filter.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "log.filter must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Service lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Cancel running services and timers when the interpreter is dropped.
    pub cancel_on_drop: bool,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            cancel_on_drop: true,
        }
    }
}

impl ServicesConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("HAREL_CANCEL_ON_DROP") {
            self.cancel_on_drop = parse_bool(&v);
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directives, used when RUST_LOG is unset.
    pub filter: String,
    /// Colored output.
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            ansi: true,
        }
    }
}

impl LogConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(filter) = var("HAREL_LOG") {
            self.filter = filter;
        }
        if let Some(ansi) = var("HAREL_LOG_ANSI") {
            self.ansi = parse_bool(&ansi);
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.max_microsteps, 10_000);
        assert_eq!(config.engine.service_errors, ServiceErrorPolicy::Ignore);
        assert!(config.services.cancel_on_drop);
        assert_eq!(config.log.filter, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harel.yaml");

        let mut config = Config::default();
        config.engine.max_microsteps = 42;
        config.engine.service_errors = ServiceErrorPolicy::Fail;
        config.log.ansi = false;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harel.yaml");
        std::fs::write(&path, "engine:\n  service_errors: fail\n").unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.engine.service_errors, ServiceErrorPolicy::Fail);
        assert_eq!(loaded.engine.max_microsteps, 10_000);
        assert!(loaded.services.cancel_on_drop);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("HAREL_MAX_MICROSTEPS", "7"),
            ("HAREL_SERVICE_ERRORS", "FAIL"),
            ("HAREL_CANCEL_ON_DROP", "false"),
            ("HAREL_LOG", "harel=debug"),
            ("HAREL_LOG_ANSI", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.engine.max_microsteps, 7);
        assert_eq!(config.engine.service_errors, ServiceErrorPolicy::Fail);
        assert!(!config.services.cancel_on_drop);
        assert_eq!(config.log.filter, "harel=debug");
        assert!(!config.log.ansi);
    }

    #[test]
    fn test_bad_overrides_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|name| match name {
            "HAREL_MAX_MICROSTEPS" => Some("lots".to_string()),
            "HAREL_SERVICE_ERRORS" => Some("explode".to_string()),
            _ => None,
        });
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.engine.max_microsteps = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_load_from_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harel.yaml");
        std::fs::write(&path, "engine:\n  max_microsteps: 0\n").unwrap();

        let result = Config::load_from(Some(path));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file("/nonexistent/harel.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(..))));
    }
}
