//! Negotiation metrics.
//!
//! Recorded through the `metrics` facade; without an installed recorder
//! every call is a no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::Once;
use std::time::Duration;

static REGISTER: Once = Once::new();

/// Records how negotiations end and how long reviews take.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegotiationMetrics;

impl NegotiationMetrics {
    pub fn new() -> Self {
        REGISTER.call_once(Self::register_metrics);
        Self
    }

    fn register_metrics() {
        describe_counter!(
            "tg_negotiations_total",
            "Total number of finished negotiations by outcome"
        );
        describe_counter!(
            "tg_token_decisions_total",
            "Total number of token decisions received from the backend"
        );
        describe_histogram!(
            "tg_review_wait_seconds",
            "Time spent waiting on a reviewer"
        );
        describe_gauge!("tg_sessions_active", "Number of proxied sessions running");
    }

    /// Records a finished negotiation. `outcome` is a short label such as
    /// `connected` or `policy_rejected`.
    pub fn record_outcome(&self, outcome: &'static str) {
        counter!("tg_negotiations_total", "outcome" => outcome).increment(1);
    }

    pub fn record_decision(&self, decision: &'static str) {
        counter!("tg_token_decisions_total", "decision" => decision).increment(1);
    }

    pub fn record_review_wait(&self, waited: Duration, state: &'static str) {
        histogram!("tg_review_wait_seconds", "state" => state).record(waited.as_secs_f64());
    }

    pub fn session_started(&self) {
        gauge!("tg_sessions_active").increment(1.0);
    }

    pub fn session_finished(&self) {
        gauge!("tg_sessions_active").decrement(1.0);
    }
}
