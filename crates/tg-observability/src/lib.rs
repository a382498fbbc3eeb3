//! # tg-observability
//!
//! Logging and metrics infrastructure for the Tollgate gateway.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
pub use metrics::NegotiationMetrics;

#[doc(hidden)]
pub use uuid;
