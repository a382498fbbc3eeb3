//! Scripted identity backend for tests.

use crate::models::{
    Account, ConnectToken, ConnectionRequest, ReviewTicket, TicketState, TicketStatus, TokenGrant,
    TokenInfo,
};
use crate::traits::{BackendError, BackendResult, IdentityBackend};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// A call received by [`MockIdentityBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    GetAccounts { user_id: String, asset_id: String },
    CreateToken(ConnectionRequest),
    ResolveToken(String),
    CheckTicket(String),
    CancelTicket(String),
}

/// Identity backend that replays scripted answers and records every call.
///
/// Token responses and ticket states are consumed in order. Once the ticket
/// script runs dry the ticket stays pending.
pub struct MockIdentityBackend {
    name: String,
    accounts: Mutex<BackendResult<Vec<Account>>>,
    token_responses: Mutex<VecDeque<BackendResult<TokenInfo>>>,
    connect_tokens: Mutex<HashMap<String, ConnectToken>>,
    ticket_states: Mutex<VecDeque<BackendResult<TicketStatus>>>,
    calls: Mutex<Vec<BackendCall>>,
}

impl MockIdentityBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            accounts: Mutex::new(Ok(Vec::new())),
            token_responses: Mutex::new(VecDeque::new()),
            connect_tokens: Mutex::new(HashMap::new()),
            ticket_states: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn set_accounts(&self, accounts: Vec<Account>) {
        *self.accounts.lock().await = Ok(accounts);
    }

    pub async fn fail_accounts(&self, error: BackendError) {
        *self.accounts.lock().await = Err(error);
    }

    pub async fn push_token_response(&self, response: BackendResult<TokenInfo>) {
        self.token_responses.lock().await.push_back(response);
    }

    pub async fn add_connect_token(&self, token: ConnectToken) {
        self.connect_tokens
            .lock()
            .await
            .insert(token.id.clone(), token);
    }

    pub async fn push_ticket_status(&self, status: BackendResult<TicketStatus>) {
        self.ticket_states.lock().await.push_back(status);
    }

    pub async fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().await.clone()
    }

    pub async fn create_token_calls(&self) -> Vec<ConnectionRequest> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                BackendCall::CreateToken(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn resolved_token_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                BackendCall::ResolveToken(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn cancelled_tickets(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                BackendCall::CancelTicket(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    async fn record(&self, call: BackendCall) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl IdentityBackend for MockIdentityBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_accounts(&self, user_id: &str, asset_id: &str) -> BackendResult<Vec<Account>> {
        self.record(BackendCall::GetAccounts {
            user_id: user_id.to_string(),
            asset_id: asset_id.to_string(),
        })
        .await;
        self.accounts.lock().await.clone()
    }

    async fn create_token(&self, request: &ConnectionRequest) -> BackendResult<TokenInfo> {
        self.record(BackendCall::CreateToken(request.clone())).await;
        self.token_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| {
                Err(BackendError::RequestFailed(
                    "no scripted token response".to_string(),
                ))
            })
    }

    async fn resolve_token(&self, grant: &TokenGrant) -> BackendResult<ConnectToken> {
        self.record(BackendCall::ResolveToken(grant.id().to_string()))
            .await;
        self.connect_tokens
            .lock()
            .await
            .get(grant.id())
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("connect token {}", grant.id())))
    }

    async fn check_ticket_state(&self, ticket: &ReviewTicket) -> BackendResult<TicketStatus> {
        self.record(BackendCall::CheckTicket(ticket.ticket_id.clone()))
            .await;
        self.ticket_states
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| {
                Ok(TicketStatus {
                    ticket_id: ticket.ticket_id.clone(),
                    state: TicketState::Pending,
                    processor: None,
                })
            })
    }

    async fn cancel_ticket(&self, ticket: &ReviewTicket) -> BackendResult<()> {
        self.record(BackendCall::CancelTicket(ticket.ticket_id.clone()))
            .await;
        Ok(())
    }
}
