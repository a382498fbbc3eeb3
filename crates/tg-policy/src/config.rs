//! Review timing configuration.
//!
//! How long a user may wait for a reviewer is a deployment decision, so
//! nothing here is fixed: the defaults poll every two seconds and wait for
//! as long as the session lives.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading review configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Settings for waiting on a review ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Interval between ticket state checks, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up waiting after this many seconds. `None` waits until the
    /// session ends or the user leaves.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Upper bound on the ticket close call made when the wait is abandoned.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_close_timeout_ms() -> u64 {
    5000
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: None,
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl ReviewConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "review.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue(
                "review.timeout_secs must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads review configuration from a YAML file.
pub fn load_review_config<P: AsRef<Path>>(path: P) -> Result<ReviewConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_review_config(&content)
}

/// Parses review configuration from YAML text.
pub fn parse_review_config(content: &str) -> Result<ReviewConfig, ConfigError> {
    let config: ReviewConfig = serde_yaml::from_str(content)?;
    config.validate()?;
    Ok(config)
}
