//! # tg-core
//!
//! Connection negotiation for the Tollgate terminal gateway.
//!
//! The [`AccessBroker`] takes a user from choosing an asset to a running
//! proxied session: it offers protocols and accounts, checks that the
//! terminal can carry the protocol, asks the identity backend for a connect
//! token, waits on a reviewer when policy requires one and finally starts
//! the session proxy.

pub mod broker;
pub mod capability;
pub mod config;
pub mod context;
pub mod i18n;
pub mod proxy;
pub mod ui;

pub use broker::{AccessBroker, NegotiationError, NegotiationOutcome, NegotiationState, User};
pub use capability::{CapabilityChecker, CapabilityConfig, LocalCapabilityChecker, ProtocolSupport};
pub use config::{load_gateway_config, parse_gateway_config, ConfigError, GatewayConfig};
pub use context::{Cancelled, SessionContext};
pub use i18n::{Language, Localizer};
pub use proxy::{ProxyError, ProxyOptions, SessionProxy, SessionProxyFactory};
pub use ui::{SelectionUi, TerminalReviewConsole};
