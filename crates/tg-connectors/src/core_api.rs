//! Core API implementation of [`IdentityBackend`].

use crate::http::{parse_json_response, HttpClient};
use crate::models::{
    Account, ConnectToken, ConnectionRequest, Decision, ReviewTicket, TicketStatus, TokenGrant,
    TokenInfo,
};
use crate::traits::{BackendConfig, BackendError, BackendResult, IdentityBackend};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

const SUPER_CONNECTION_TOKEN_PATH: &str = "/api/v1/authentication/super-connection-token/";
const CONNECTION_TOKEN_SECRET_PATH: &str =
    "/api/v1/authentication/super-connection-token/secret/";

/// Identity backend reached over the core HTTP API.
pub struct CoreApiBackend {
    config: BackendConfig,
    client: HttpClient,
}

#[derive(Debug, Deserialize)]
struct PermedAssetAccounts {
    #[serde(default)]
    permed_accounts: Vec<Account>,
}

#[derive(Debug, Serialize)]
struct SecretRequest<'a> {
    id: &'a str,
    expire_now: bool,
}

impl CoreApiBackend {
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        let client = HttpClient::new(config.clone())?;
        info!(base_url = %config.base_url, "Core API backend initialized");
        Ok(Self { config, client })
    }
}

/// Interprets the answer to a token request.
///
/// A failed status still carries a policy decision when the body names one;
/// without a decision code it is a transport failure.
fn classify_token_response(status: StatusCode, body: &str) -> BackendResult<TokenInfo> {
    if status.is_success() {
        return serde_json::from_str(body).map_err(|e| {
            BackendError::InvalidResponse(format!("Failed to parse token info: {}", e))
        });
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(BackendError::AuthenticationFailed("Unauthorized".to_string()));
    }
    match serde_json::from_str::<TokenInfo>(body) {
        Ok(info) if info.decision != Decision::Allow => Ok(info),
        _ => Err(BackendError::RequestFailed(format!(
            "status {}: {}",
            status,
            body.chars().take(500).collect::<String>()
        ))),
    }
}

#[async_trait]
impl IdentityBackend for CoreApiBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(skip(self))]
    async fn get_accounts(&self, user_id: &str, asset_id: &str) -> BackendResult<Vec<Account>> {
        let path = format!(
            "/api/v1/perms/users/{}/assets/{}/",
            urlencoding::encode(user_id),
            urlencoding::encode(asset_id)
        );
        let perms: PermedAssetAccounts = self.client.get_json(&path).await?;
        Ok(perms.permed_accounts)
    }

    #[instrument(skip(self), fields(asset_id = %request.asset_id(), protocol = %request.protocol()))]
    async fn create_token(&self, request: &ConnectionRequest) -> BackendResult<TokenInfo> {
        let response = self
            .client
            .post_unchecked(SUPER_CONNECTION_TOKEN_PATH, request)
            .await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        classify_token_response(status, &body)
    }

    #[instrument(skip(self), fields(token_id = %grant.id()))]
    async fn resolve_token(&self, grant: &TokenGrant) -> BackendResult<ConnectToken> {
        let body = SecretRequest {
            id: grant.id(),
            expire_now: false,
        };
        self.client
            .post_json(CONNECTION_TOKEN_SECRET_PATH, &body)
            .await
    }

    #[instrument(skip(self), fields(ticket_id = %ticket.ticket_id))]
    async fn check_ticket_state(&self, ticket: &ReviewTicket) -> BackendResult<TicketStatus> {
        let response = self
            .client
            .request(&ticket.check_api.method, &ticket.check_api.url)
            .await?;
        parse_json_response(response).await
    }

    #[instrument(skip(self), fields(ticket_id = %ticket.ticket_id))]
    async fn cancel_ticket(&self, ticket: &ReviewTicket) -> BackendResult<()> {
        match self
            .client
            .request(&ticket.close_api.method, &ticket.close_api.url)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Failed to close review ticket");
                Err(e)
            }
        }
    }
}
