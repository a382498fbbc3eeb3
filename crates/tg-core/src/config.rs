//! Gateway configuration loading.
//!
//! The file is YAML. `${VAR}` references are replaced from the environment
//! before parsing so credentials can stay out of the file.

use crate::capability::CapabilityConfig;
use crate::i18n::Language;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tg_connectors::{BackendConfig, DEFAULT_CONNECT_METHOD};
use tg_observability::LoggingConfig;
use tg_policy::ReviewConfig;
use thiserror::Error;
use tracing::info;

/// Errors that can occur while loading the gateway configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Invalid review configuration: {0}")]
    Review(#[from] tg_policy::ConfigError),
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Default display language of sessions.
    #[serde(default)]
    pub language: Language,
    /// Connect method sent with token requests.
    #[serde(default = "default_connect_method")]
    pub connect_method: String,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub capability: CapabilityConfig,
    /// Core API connection.
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_connect_method() -> String {
    DEFAULT_CONNECT_METHOD.to_string()
}

impl GatewayConfig {
    /// Checks values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_method.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "connect_method must not be empty".to_string(),
            ));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "backend.base_url must not be empty".to_string(),
            ));
        }
        if self.backend.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "backend.timeout_secs must be greater than 0".to_string(),
            ));
        }
        self.review.validate()?;
        Ok(())
    }
}

/// Replaces `${VAR}` references with environment values.
///
/// Every missing variable is reported, not just the first.
fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
    let mut missing = Vec::new();

    let result = re.replace_all(input, |cap: &Captures<'_>| match env::var(&cap[1]) {
        Ok(value) => value,
        Err(_) => {
            missing.push(cap[1].to_string());
            String::new()
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::EnvVarNotFound(missing.join(", ")));
    }

    Ok(result.into_owned())
}

/// Parses a configuration document.
pub fn parse_gateway_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let content = substitute_env_vars(content)?;
    let config: GatewayConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Loads and validates the configuration file at `path`.
pub fn load_gateway_config(path: impl AsRef<Path>) -> Result<GatewayConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let config = parse_gateway_config(&content)?;
    info!(
        path = %path.display(),
        backend = %config.backend.base_url,
        language = %config.language,
        "Loaded gateway configuration"
    );
    Ok(config)
}
