//! Identity backend interface.
//!
//! The backend evaluates access policy, hands out eligible accounts, issues
//! and resolves connect tokens, and exposes the review tickets opened for
//! requests that need a human decision.

use crate::models::{
    Account, ConnectToken, ConnectionRequest, ReviewTicket, TicketStatus, TokenGrant, TokenInfo,
};
use crate::secure_string::SecureString;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Transport-level failures talking to the backend.
///
/// A policy decision is never an error: rejected and pending requests come
/// back as `Ok(TokenInfo)` carrying the decision.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Connection settings for the core API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Name used in logs.
    #[serde(default = "default_backend_name")]
    pub name: String,
    /// Base URL of the core API.
    pub base_url: String,
    /// Credentials the terminal presents.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Whether to verify TLS certificates.
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_backend_name() -> String {
    "core-api".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            name: default_backend_name(),
            base_url: base_url.into(),
            auth: AuthConfig::None,
            timeout_secs: default_timeout_secs(),
            verify_tls: true,
            headers: HashMap::new(),
        }
    }
}

/// How the terminal authenticates to the core API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    /// Access key sent in a custom header.
    AccessKey {
        key: SecureString,
        #[serde(default = "default_access_key_header")]
        header_name: String,
    },
    BearerToken {
        token: SecureString,
    },
}

fn default_access_key_header() -> String {
    "X-Access-Key".to_string()
}

/// Policy and token service consumed by the access broker.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Returns the backend name for logs.
    fn name(&self) -> &str;

    /// Lists the accounts `user_id` may use on `asset_id`.
    async fn get_accounts(&self, user_id: &str, asset_id: &str) -> BackendResult<Vec<Account>>;

    /// Requests a connect token.
    ///
    /// `Err` only for transport failures; every policy outcome is an `Ok`.
    async fn create_token(&self, request: &ConnectionRequest) -> BackendResult<TokenInfo>;

    /// Resolves an allowed token into the full connect token.
    async fn resolve_token(&self, grant: &TokenGrant) -> BackendResult<ConnectToken>;

    /// Polls the state of a review ticket.
    async fn check_ticket_state(&self, ticket: &ReviewTicket) -> BackendResult<TicketStatus>;

    /// Withdraws a review ticket that is no longer awaited.
    async fn cancel_ticket(&self, ticket: &ReviewTicket) -> BackendResult<()>;
}
