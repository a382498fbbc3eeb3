//! Logging setup for the gateway.
//!
//! Structured logging through the tracing ecosystem. `RUST_LOG` overrides
//! the configured level when set.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level for the gateway crates.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json_format: bool,
    /// Log span open/close events.
    #[serde(default)]
    pub include_spans: bool,
    /// Include file and line of the call site.
    #[serde(default)]
    pub include_location: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json_format: false,
            include_spans: false,
            include_location: true,
        }
    }
}

impl LoggingConfig {
    /// Verbose text output for local work.
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            json_format: false,
            include_spans: true,
            include_location: true,
        }
    }

    /// JSON output for log shipping.
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            json_format: true,
            include_spans: false,
            include_location: false,
        }
    }

    /// Parsed level, falling back to INFO for unknown names.
    pub fn level(&self) -> Level {
        self.level.parse().unwrap_or(Level::INFO)
    }

    /// Default directive string covering the gateway crates.
    pub fn filter_directives(&self) -> String {
        let level = self.level();
        ["tg_core", "tg_policy", "tg_connectors", "tg_observability"]
            .iter()
            .map(|target| format!("{}={}", target, level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Initializes logging with the default configuration.
pub fn init_logging() {
    init_logging_with_config(&LoggingConfig::default());
}

/// Initializes logging with the given configuration.
pub fn init_logging_with_config(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let span_events = if config.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    } else {
        let fmt_layer = fmt::layer()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }
}

/// Creates the span a negotiation runs in.
#[macro_export]
macro_rules! negotiation_span {
    ($user_id:expr, $asset_id:expr) => {
        tracing::info_span!(
            "negotiation",
            user_id = %$user_id,
            asset_id = %$asset_id,
            negotiation_id = %$crate::uuid::Uuid::new_v4()
        )
    };
}
