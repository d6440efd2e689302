//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use crate::config::schema::DaemonConfig;
use crate::config::validation::{validate_config, ValidationError};

pub const ENV_NAMESPACE: &str = "APISET_NAMESPACE";
pub const ENV_NAME: &str = "APISET_NAME";
pub const ENV_GENERATION: &str = "APISET_GENERATION";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { var: &'static str, value: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { var, value } => write!(f, "Invalid {}: '{}'", var, value),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load configuration from an optional TOML file, apply environment
/// overrides, and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<DaemonConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(ConfigError::Parse)?
        }
        None => DaemonConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Override the APISet reference from variables looked up by `lookup`.
pub fn apply_env_overrides<F>(config: &mut DaemonConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(namespace) = lookup(ENV_NAMESPACE) {
        config.apiset.namespace = namespace;
    }
    if let Some(name) = lookup(ENV_NAME) {
        config.apiset.name = name;
    }
    if let Some(value) = lookup(ENV_GENERATION) {
        config.apiset.generation = value.trim().parse().map_err(|_| ConfigError::Env {
            var: ENV_GENERATION,
            value,
        })?;
    }
    Ok(())
}
