//! Access broker.
//!
//! Runs one connection negotiation for one user: pick a protocol and an
//! account, obtain a connect token from the identity backend (waiting for a
//! reviewer when policy asks for one), then hand the session to a proxy.
//! Each failure ends the attempt; nothing is retried.

use crate::capability::{CapabilityChecker, ProtocolSupport};
use crate::config::GatewayConfig;
use crate::context::{Cancelled, SessionContext};
use crate::i18n::{keys, Language, Localizer};
use crate::proxy::{ProxyError, ProxyOptions, SessionProxyFactory};
use crate::ui::{wrap_warn, SelectionUi, TerminalReviewConsole, CHAR_NEW_LINE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tg_connectors::{
    Account, Asset, BackendError, ConnectToken, ConnectionRequest, Decision, IdentityBackend,
    TokenGrant, TokenInfo, DEFAULT_CONNECT_METHOD,
};
use tg_observability::{negotiation_span, NegotiationMetrics};
use tg_policy::{
    PendingReview, ReviewConfig, ReviewError, ReviewOutcome, ReviewState, ReviewWaiter,
    TicketReviewWaiter,
};
use thiserror::Error;
use tracing::{debug, error, info, warn, Instrument};

/// The user a broker negotiates for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
}

impl User {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

/// Why a negotiation attempt ended without a session.
#[derive(Error, Debug, Clone)]
pub enum NegotiationError {
    #[error("Failed to fetch eligible accounts: {0}")]
    AccountFetch(BackendError),

    #[error("Token request failed: {0}")]
    TokenRequest(BackendError),

    #[error("Connect request rejected by policy: {detail}")]
    PolicyRejected { detail: String },

    #[error("Review wait failed: {0}")]
    ReviewWait(#[from] ReviewError),

    #[error("Review did not approve the request")]
    ReviewNotApproved,

    #[error("Client {client} for protocol {protocol} is not installed")]
    ClientMissing { protocol: String, client: String },

    #[error("Protocol {protocol} is not supported by this terminal")]
    ProtocolUnsupported { protocol: String },

    #[error("Failed to resolve connect token: {0}")]
    TokenResolution(BackendError),

    #[error("Failed to construct session proxy: {0}")]
    ProxyConstruction(#[from] ProxyError),

    #[error("Unrecognized token decision {code}: {detail}")]
    UnrecognizedDecision { code: String, detail: String },
}

impl NegotiationError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            NegotiationError::AccountFetch(_) => "account_fetch",
            NegotiationError::TokenRequest(_) => "token_request",
            NegotiationError::PolicyRejected { .. } => "policy_rejected",
            NegotiationError::ReviewWait(_) => "review_wait",
            NegotiationError::ReviewNotApproved => "review_not_approved",
            NegotiationError::ClientMissing { .. } => "client_missing",
            NegotiationError::ProtocolUnsupported { .. } => "protocol_unsupported",
            NegotiationError::TokenResolution(_) => "token_resolution",
            NegotiationError::ProxyConstruction(_) => "proxy_construction",
            NegotiationError::UnrecognizedDecision { .. } => "unrecognized_decision",
        }
    }

    /// The text shown to the user, or `None` for failures that stay in the
    /// logs.
    pub fn user_message(&self, localizer: &Localizer) -> Option<String> {
        match self {
            NegotiationError::AccountFetch(_)
            | NegotiationError::ReviewNotApproved
            | NegotiationError::UnrecognizedDecision { .. } => None,
            NegotiationError::TokenRequest(_) | NegotiationError::ReviewWait(_) => {
                Some(localizer.t(keys::CORE_API_FAILED))
            }
            NegotiationError::PolicyRejected { .. } => {
                Some(format!("{}{}", localizer.t(keys::ACL_REJECT), CHAR_NEW_LINE))
            }
            NegotiationError::ClientMissing { protocol, .. } => Some(wrap_warn(
                &localizer.tf(keys::CLIENT_NOT_INSTALLED, &[protocol.as_str()]),
            )),
            NegotiationError::ProtocolUnsupported { protocol } => Some(wrap_warn(
                &localizer.tf(keys::PROTOCOL_UNSUPPORTED, &[protocol.as_str()]),
            )),
            NegotiationError::TokenResolution(_) => Some(localizer.t(keys::CONNECT_TOKEN_ERR)),
            NegotiationError::ProxyConstruction(_) => {
                Some(localizer.t(keys::PROXY_CREATE_FAILED))
            }
        }
    }
}

/// How a call to [`AccessBroker::negotiate_and_connect`] ended.
#[derive(Debug, Clone)]
pub enum NegotiationOutcome {
    /// A proxy ran the session to completion.
    Connected,
    /// The user backed out of a selection.
    Declined,
    /// The session ended mid-negotiation.
    Cancelled,
    Failed(NegotiationError),
}

impl NegotiationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            NegotiationOutcome::Connected => "connected",
            NegotiationOutcome::Declined => "declined",
            NegotiationOutcome::Cancelled => "cancelled",
            NegotiationOutcome::Failed(e) => e.kind(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, NegotiationOutcome::Connected)
    }

    pub fn error(&self) -> Option<&NegotiationError> {
        match self {
            NegotiationOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Selections and results of one negotiation attempt.
#[derive(Debug, Clone)]
pub struct NegotiationState {
    asset: Asset,
    protocol: Option<String>,
    account: Option<Account>,
    token: Option<TokenInfo>,
}

impl NegotiationState {
    pub fn new(asset: Asset) -> Self {
        Self {
            asset,
            protocol: None,
            account: None,
            token: None,
        }
    }

    /// Records the confirmed protocol and account together and returns the
    /// token request they describe.
    pub fn confirm_selection(
        &mut self,
        user_id: &str,
        protocol: String,
        account: Account,
        connect_method: &str,
    ) -> ConnectionRequest {
        let request = ConnectionRequest::new(
            user_id,
            self.asset.id.clone(),
            account.alias.clone(),
            protocol.clone(),
            connect_method,
        );
        self.protocol = Some(protocol);
        self.account = Some(account);
        request
    }

    pub fn asset(&self) -> &Asset {
        &self.asset
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    /// The decision the attempt continues with.
    pub fn token(&self) -> Option<&TokenInfo> {
        self.token.as_ref()
    }
}

enum Halt {
    Declined,
    Cancelled,
    Failed(NegotiationError),
}

impl From<Cancelled> for Halt {
    fn from(_: Cancelled) -> Self {
        Halt::Cancelled
    }
}

impl From<NegotiationError> for Halt {
    fn from(e: NegotiationError) -> Self {
        Halt::Failed(e)
    }
}

/// Negotiates connections for one user interaction.
pub struct AccessBroker {
    user: User,
    ctx: SessionContext,
    backend: Arc<dyn IdentityBackend>,
    ui: Arc<dyn SelectionUi>,
    capabilities: Arc<dyn CapabilityChecker>,
    reviewer: Arc<dyn ReviewWaiter>,
    proxies: Arc<dyn SessionProxyFactory>,
    localizer: Localizer,
    connect_method: String,
    metrics: NegotiationMetrics,
}

impl AccessBroker {
    pub fn new(
        user: User,
        ctx: SessionContext,
        backend: Arc<dyn IdentityBackend>,
        ui: Arc<dyn SelectionUi>,
        capabilities: Arc<dyn CapabilityChecker>,
        proxies: Arc<dyn SessionProxyFactory>,
    ) -> Self {
        let reviewer = Arc::new(TicketReviewWaiter::new(
            backend.clone(),
            ReviewConfig::default(),
        ));
        Self {
            user,
            ctx,
            backend,
            ui,
            capabilities,
            reviewer,
            proxies,
            localizer: Localizer::default(),
            connect_method: DEFAULT_CONNECT_METHOD.to_string(),
            metrics: NegotiationMetrics::new(),
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.localizer = Localizer::new(language);
        self
    }

    pub fn with_connect_method(mut self, method: impl Into<String>) -> Self {
        self.connect_method = method.into();
        self
    }

    pub fn with_review_waiter(mut self, reviewer: Arc<dyn ReviewWaiter>) -> Self {
        self.reviewer = reviewer;
        self
    }

    /// Uses the ticket-polling waiter with `config`.
    pub fn with_review_config(mut self, config: ReviewConfig) -> Self {
        self.reviewer = Arc::new(TicketReviewWaiter::new(self.backend.clone(), config));
        self
    }

    /// Applies the language, connect method and review settings of `config`.
    pub fn with_config(self, config: &GatewayConfig) -> Self {
        self.with_language(config.language)
            .with_connect_method(config.connect_method.clone())
            .with_review_config(config.review.clone())
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Negotiates access to `asset` and, on success, runs the session until
    /// it closes.
    ///
    /// All user-facing effects happen inside: messages are written to the
    /// UI and the proxy is run here. The returned outcome only summarizes
    /// them.
    pub async fn negotiate_and_connect(&self, asset: &Asset) -> NegotiationOutcome {
        let span = negotiation_span!(self.user.id, asset.id);
        async {
            let started = Instant::now();
            let outcome = match self.negotiate(asset).await {
                Ok(()) => NegotiationOutcome::Connected,
                Err(Halt::Declined) => {
                    debug!("User backed out of selection");
                    NegotiationOutcome::Declined
                }
                Err(Halt::Cancelled) => {
                    debug!("Session ended during negotiation");
                    NegotiationOutcome::Cancelled
                }
                Err(Halt::Failed(e)) => {
                    self.report(&e).await;
                    NegotiationOutcome::Failed(e)
                }
            };
            self.metrics.record_outcome(outcome.label());
            info!(
                outcome = outcome.label(),
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Negotiation finished"
            );
            outcome
        }
        .instrument(span)
        .await
    }

    async fn negotiate(&self, asset: &Asset) -> Result<(), Halt> {
        let mut state = NegotiationState::new(asset.clone());

        let accounts = self
            .ctx
            .guard(self.backend.get_accounts(&self.user.id, &asset.id))
            .await?
            .map_err(NegotiationError::AccountFetch)?;
        debug!(count = accounts.len(), "Fetched eligible accounts");

        let protocols = asset.support_protocols();
        let protocol = self
            .ctx
            .guard(self.ui.choose_protocol(&protocols))
            .await?
            .ok_or(Halt::Declined)?;
        if !protocols.contains(&protocol) {
            warn!(protocol = %protocol, "Selected protocol was not offered");
            return Err(Halt::Declined);
        }

        match self.capabilities.check_supported(&protocol) {
            ProtocolSupport::Supported => {}
            ProtocolSupport::ClientMissing { client } => {
                return Err(NegotiationError::ClientMissing { protocol, client }.into());
            }
            ProtocolSupport::Unsupported => {
                return Err(NegotiationError::ProtocolUnsupported { protocol }.into());
            }
        }

        let account = self
            .ctx
            .guard(self.ui.choose_account(&accounts))
            .await?
            .ok_or(Halt::Declined)?;
        if !accounts.iter().any(|a| a.id == account.id) {
            warn!(account = %account.alias, "Selected account was not offered");
            return Err(Halt::Declined);
        }

        let request =
            state.confirm_selection(&self.user.id, protocol, account, &self.connect_method);
        info!(
            protocol = %request.protocol(),
            account = %request.account(),
            "Requesting connect token"
        );

        let token = self
            .ctx
            .guard(self.backend.create_token(&request))
            .await?
            .map_err(NegotiationError::TokenRequest)?;
        self.metrics.record_decision(token.decision.label());

        let token = match token.decision.clone() {
            Decision::Allow => token,
            Decision::Reject => {
                return Err(NegotiationError::PolicyRejected {
                    detail: token.detail,
                }
                .into());
            }
            Decision::ReviewPending => self.await_review(&request, &token).await?,
            Decision::Other(code) => {
                return Err(NegotiationError::UnrecognizedDecision {
                    code,
                    detail: token.detail,
                }
                .into());
            }
        };
        state.token = Some(token.clone());

        let grant = token.into_grant().map_err(|info| {
            NegotiationError::TokenRequest(BackendError::InvalidResponse(format!(
                "token decision {} carries no usable grant",
                info.decision
            )))
        })?;

        let connect_token = self.resolve(&grant).await?;
        self.connect(connect_token).await
    }

    async fn await_review(
        &self,
        request: &ConnectionRequest,
        token: &TokenInfo,
    ) -> Result<TokenInfo, Halt> {
        info!(token_id = %token.id, "Connect request needs review");
        let console = TerminalReviewConsole::new(self.ui.as_ref(), self.localizer);
        let started = Instant::now();
        let result = self
            .reviewer
            .wait_review(
                PendingReview {
                    request,
                    token,
                    console: &console,
                },
                self.ctx.cancel_receiver(),
            )
            .await;
        self.metrics
            .record_review_wait(started.elapsed(), ReviewState::of(&result).as_str());

        match result {
            Ok(ReviewOutcome::Approved(approved)) => Ok(approved),
            Ok(ReviewOutcome::Cancelled) if self.ctx.is_cancelled() => Err(Halt::Cancelled),
            Ok(ReviewOutcome::Denied) | Ok(ReviewOutcome::Cancelled) => {
                Err(NegotiationError::ReviewNotApproved.into())
            }
            Err(e) => Err(NegotiationError::ReviewWait(e).into()),
        }
    }

    async fn resolve(&self, grant: &TokenGrant) -> Result<ConnectToken, Halt> {
        let connect_token = self
            .ctx
            .guard(self.backend.resolve_token(grant))
            .await?
            .map_err(NegotiationError::TokenResolution)?;
        if connect_token.is_expired() {
            return Err(NegotiationError::TokenResolution(BackendError::InvalidResponse(
                format!("connect token {} already expired", connect_token.id),
            ))
            .into());
        }
        Ok(connect_token)
    }

    async fn connect(&self, connect_token: ConnectToken) -> Result<(), Halt> {
        if self.ctx.is_cancelled() {
            return Err(Halt::Cancelled);
        }

        let options = ProxyOptions::new(connect_token)
            .with_language(self.localizer.language())
            .with_connect_method(self.connect_method.clone())
            .with_session_id(self.ctx.id());
        let session_id = options.session_id;
        let proxy = self
            .proxies
            .create(&self.ctx, self.backend.clone(), options)
            .map_err(NegotiationError::ProxyConstruction)?;

        info!(session_id = %session_id, "Session proxy started");
        self.metrics.session_started();
        proxy.run().await;
        self.metrics.session_finished();
        info!(session_id = %session_id, "Session proxy finished");
        Ok(())
    }

    /// Logs a failed attempt and tells the user when the failure is meant to
    /// be visible. Nothing is written once the session is gone.
    async fn report(&self, e: &NegotiationError) {
        match e {
            NegotiationError::PolicyRejected { .. }
            | NegotiationError::ReviewNotApproved
            | NegotiationError::ClientMissing { .. }
            | NegotiationError::ProtocolUnsupported { .. } => {
                info!(kind = e.kind(), error = %e, "Negotiation stopped")
            }
            NegotiationError::UnrecognizedDecision { .. } => {
                warn!(kind = e.kind(), error = %e, "Negotiation stopped")
            }
            _ => error!(kind = e.kind(), error = %e, "Negotiation failed"),
        }

        if self.ctx.is_cancelled() {
            return;
        }
        if let Some(message) = e.user_message(&self.localizer) {
            self.ui.write_message(&message).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_connectors::testing::{sample_account, sample_asset};

    #[test]
    fn test_visibility_table() {
        let l = Localizer::default();
        let invisible = [
            NegotiationError::AccountFetch(BackendError::Timeout("t".into())),
            NegotiationError::ReviewNotApproved,
            NegotiationError::UnrecognizedDecision {
                code: "acl_face_verify".into(),
                detail: String::new(),
            },
        ];
        for e in invisible {
            assert!(e.user_message(&l).is_none(), "{} should be silent", e.kind());
        }

        let visible = [
            (
                NegotiationError::TokenRequest(BackendError::Timeout("t".into())),
                "Core API failed",
            ),
            (
                NegotiationError::ReviewWait(ReviewError::MissingTicket),
                "Core API failed",
            ),
            (
                NegotiationError::PolicyRejected {
                    detail: String::new(),
                },
                "ACL reject\r\n",
            ),
            (
                NegotiationError::TokenResolution(BackendError::NotFound("x".into())),
                "get connect token err",
            ),
            (
                NegotiationError::ProxyConstruction(ProxyError::Setup("x".into())),
                "Create proxy session failed",
            ),
        ];
        for (e, expected) in visible {
            assert_eq!(e.user_message(&l).as_deref(), Some(expected));
        }
    }

    #[test]
    fn test_capability_messages_differ() {
        let l = Localizer::default();
        let missing = NegotiationError::ClientMissing {
            protocol: "mysql".into(),
            client: "mysql".into(),
        }
        .user_message(&l)
        .unwrap();
        let unsupported = NegotiationError::ProtocolUnsupported {
            protocol: "mysql".into(),
        }
        .user_message(&l)
        .unwrap();
        assert!(missing.contains("mysql protocol client not installed."));
        assert!(unsupported.contains("please use web terminal"));
        assert_ne!(missing, unsupported);
    }

    #[test]
    fn test_confirm_selection_sets_both() {
        let mut state = NegotiationState::new(sample_asset("asset-1", &["ssh"]));
        assert!(state.protocol().is_none());
        assert!(state.account().is_none());

        let request =
            state.confirm_selection("user-1", "ssh".into(), sample_account("root"), "ssh");
        assert_eq!(request.asset_id(), "asset-1");
        assert_eq!(request.account(), "root");
        assert_eq!(state.protocol(), Some("ssh"));
        assert_eq!(state.account().map(|a| a.username.as_str()), Some("root"));
        assert!(state.token().is_none());
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(NegotiationOutcome::Connected.label(), "connected");
        assert_eq!(
            NegotiationOutcome::Failed(NegotiationError::ReviewNotApproved).label(),
            "review_not_approved"
        );
        assert!(NegotiationOutcome::Declined.error().is_none());
    }
}
