//! # tg-policy
//!
//! Human review of connect requests for the Tollgate gateway.
//!
//! This crate provides the review waiter that blocks a negotiation while an
//! out-of-band reviewer decides on a pending request, and its configuration.

pub mod config;
pub mod review;

pub use config::{load_review_config, parse_review_config, ConfigError, ReviewConfig};
pub use review::{
    PendingReview, ReviewConsole, ReviewError, ReviewNotice, ReviewOutcome, ReviewState,
    ReviewWaiter, TicketReviewWaiter,
};
