//! # tg-connectors
//!
//! Identity backend integration for the Tollgate terminal gateway.
//!
//! This crate defines the backend trait the access broker talks to, the data
//! it exchanges (assets, accounts, token decisions, review tickets, connect
//! tokens), an HTTP implementation against the core API and a scripted mock.

pub mod core_api;
pub mod http;
pub mod mock;
pub mod models;
pub mod secure_string;
pub mod testing;
pub mod traits;

pub use core_api::CoreApiBackend;
pub use mock::{BackendCall, MockIdentityBackend};
pub use models::{
    Account, Asset, ConnectAccount, ConnectToken, ConnectionRequest, Decision, Platform,
    Protocol, ReviewTicket, TicketApi, TicketState, TicketStatus, TokenGrant, TokenInfo,
    TokenUser, DEFAULT_CONNECT_METHOD,
};
pub use secure_string::SecureString;
pub use traits::{AuthConfig, BackendConfig, BackendError, BackendResult, IdentityBackend};
