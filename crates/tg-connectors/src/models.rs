//! Data exchanged with the identity backend.
//!
//! These are snapshots: the gateway never mutates an asset, account or token
//! it received, it only reads them while a negotiation is running.

use crate::secure_string::SecureString;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connect method the terminal reports when it asks for a token.
pub const DEFAULT_CONNECT_METHOD: &str = "ssh";

/// Wire code for a policy rejection.
pub const ACL_REJECT: &str = "acl_reject";
/// Wire code for a request that needs human review.
pub const ACL_REVIEW: &str = "acl_review";

/// A protocol an asset can be reached over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Protocol {
    pub name: String,
    #[serde(default)]
    pub port: u16,
}

/// Platform the asset runs (Linux, Windows, a switch OS, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Platform {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

/// A managed remote target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub address: String,
    /// Supported protocols, in the order the backend ranks them.
    #[serde(default)]
    pub protocols: Vec<Protocol>,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub org_name: String,
    #[serde(default)]
    pub comment: String,
}

impl Asset {
    /// Returns the names of the protocols this asset supports, preserving order.
    pub fn support_protocols(&self) -> Vec<String> {
        self.protocols.iter().map(|p| p.name.clone()).collect()
    }

    /// Checks whether `protocol` is one of the asset's protocols.
    pub fn supports(&self, protocol: &str) -> bool {
        self.protocols.iter().any(|p| p.name == protocol)
    }
}

/// An identity usable to authenticate on an asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub username: String,
    /// Identifier carried by token requests.
    pub alias: String,
    #[serde(default)]
    pub secret_type: String,
}

/// Parameters of a single token request.
///
/// Built once per negotiation attempt. The review waiter re-issues the very
/// same request after approval, so the fields cannot be changed after
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionRequest {
    #[serde(rename = "user")]
    user_id: String,
    #[serde(rename = "asset")]
    asset_id: String,
    account: String,
    protocol: String,
    connect_method: String,
}

impl ConnectionRequest {
    pub fn new(
        user_id: impl Into<String>,
        asset_id: impl Into<String>,
        account: impl Into<String>,
        protocol: impl Into<String>,
        connect_method: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            asset_id: asset_id.into(),
            account: account.into(),
            protocol: protocol.into(),
            connect_method: connect_method.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    /// Alias of the selected account.
    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn connect_method(&self) -> &str {
        &self.connect_method
    }
}

/// Outcome of the backend's policy evaluation for a token request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Decision {
    /// No code on the response.
    #[default]
    Allow,
    Reject,
    ReviewPending,
    /// A code this gateway does not know.
    Other(String),
}

impl Decision {
    pub fn code(&self) -> &str {
        match self {
            Decision::Allow => "",
            Decision::Reject => ACL_REJECT,
            Decision::ReviewPending => ACL_REVIEW,
            Decision::Other(code) => code,
        }
    }

    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Reject => "reject",
            Decision::ReviewPending => "review",
            Decision::Other(_) => "other",
        }
    }
}

impl From<String> for Decision {
    fn from(code: String) -> Self {
        match code.as_str() {
            "" => Decision::Allow,
            ACL_REJECT => Decision::Reject,
            ACL_REVIEW => Decision::ReviewPending,
            _ => Decision::Other(code),
        }
    }
}

impl From<Decision> for String {
    fn from(decision: Decision) -> Self {
        decision.code().to_string()
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "allow"),
            other => write!(f, "{}", other.code()),
        }
    }
}

/// A backend endpoint handed out with a review ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketApi {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Handle on the out-of-band review opened for a pending token request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewTicket {
    pub ticket_id: String,
    #[serde(rename = "check_ticket_api")]
    pub check_api: TicketApi,
    #[serde(rename = "close_ticket_api")]
    pub close_api: TicketApi,
    #[serde(rename = "ticket_detail_page_url", default)]
    pub detail_url: String,
    #[serde(rename = "assignees", default)]
    pub reviewers: Vec<String>,
}

/// State of a review ticket as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    #[serde(rename = "open")]
    Pending,
    Approved,
    Rejected,
    Closed,
}

/// Result of polling a review ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketStatus {
    #[serde(rename = "id")]
    pub ticket_id: String,
    pub state: TicketState,
    #[serde(default)]
    pub processor: Option<String>,
}

/// The backend's answer to a token request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "code", default)]
    pub decision: Decision,
    #[serde(default)]
    pub detail: String,
    #[serde(rename = "ticket_info", default)]
    pub ticket: Option<ReviewTicket>,
}

impl TokenInfo {
    pub fn allow(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn reject(detail: impl Into<String>) -> Self {
        Self {
            decision: Decision::Reject,
            detail: detail.into(),
            ..Self::default()
        }
    }

    pub fn review(id: impl Into<String>, ticket: ReviewTicket) -> Self {
        Self {
            id: id.into(),
            decision: Decision::ReviewPending,
            ticket: Some(ticket),
            ..Self::default()
        }
    }

    /// Converts an allowed token into a grant that can be resolved.
    ///
    /// Returns the token unchanged when its decision is anything but `Allow`.
    pub fn into_grant(self) -> Result<TokenGrant, TokenInfo> {
        match self.decision {
            Decision::Allow if !self.id.is_empty() => Ok(TokenGrant { id: self.id }),
            _ => Err(self),
        }
    }
}

/// Proof that the backend allowed a token request.
///
/// Only obtainable through [`TokenInfo::into_grant`], so a connect token can
/// never be resolved from a rejected or pending decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    id: String,
}

impl TokenGrant {
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// User the connect token was issued to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
}

/// Account material the proxy presents to the asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectAccount {
    pub name: String,
    pub username: String,
    #[serde(default)]
    pub secret: SecureString,
    #[serde(default)]
    pub secret_type: String,
}

/// Fully resolved authorization artifact for one proxied session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectToken {
    pub id: String,
    #[serde(default)]
    pub value: SecureString,
    pub user: TokenUser,
    pub asset: Asset,
    pub account: ConnectAccount,
    pub protocol: String,
    #[serde(default)]
    pub connect_method: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expire_at: DateTime<Utc>,
}

impl ConnectToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expire_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_codes() {
        assert_eq!(Decision::from(String::new()), Decision::Allow);
        assert_eq!(Decision::from("acl_reject".to_string()), Decision::Reject);
        assert_eq!(
            Decision::from("acl_review".to_string()),
            Decision::ReviewPending
        );
        assert_eq!(
            Decision::from("acl_warning".to_string()),
            Decision::Other("acl_warning".to_string())
        );
    }

    #[test]
    fn test_token_info_without_code_is_allow() {
        let info: TokenInfo = serde_json::from_str(r#"{"id": "tok1"}"#).unwrap();
        assert_eq!(info.decision, Decision::Allow);
        assert_eq!(info.into_grant().unwrap().id(), "tok1");
    }

    #[test]
    fn test_review_payload_parses_ticket() {
        let body = r#"{
            "code": "acl_review",
            "detail": "need review",
            "ticket_info": {
                "ticket_id": "t-9",
                "check_ticket_api": {"method": "GET", "url": "/api/v1/tickets/t-9/status/"},
                "close_ticket_api": {"method": "DELETE", "url": "/api/v1/tickets/t-9/"},
                "ticket_detail_page_url": "https://core/tickets/t-9",
                "assignees": ["alice", "bob"]
            }
        }"#;
        let info: TokenInfo = serde_json::from_str(body).unwrap();
        assert_eq!(info.decision, Decision::ReviewPending);
        let ticket = info.ticket.clone().unwrap();
        assert_eq!(ticket.ticket_id, "t-9");
        assert_eq!(ticket.close_api.method, "DELETE");
        assert_eq!(ticket.reviewers, vec!["alice", "bob"]);
        assert!(info.into_grant().is_err());
    }

    #[test]
    fn test_only_allow_yields_grant() {
        assert!(TokenInfo::reject("no").into_grant().is_err());
        assert!(TokenInfo::allow("").into_grant().is_err());
        let other = TokenInfo {
            id: "x".into(),
            decision: Decision::Other("acl_warning".into()),
            ..TokenInfo::default()
        };
        assert!(other.into_grant().is_err());
    }

    #[test]
    fn test_ticket_state_wire_names() {
        let status: TicketStatus =
            serde_json::from_str(r#"{"id": "t-1", "state": "open"}"#).unwrap();
        assert_eq!(status.state, TicketState::Pending);
        let status: TicketStatus =
            serde_json::from_str(r#"{"id": "t-1", "state": "approved", "processor": "alice"}"#)
                .unwrap();
        assert_eq!(status.state, TicketState::Approved);
        assert_eq!(status.processor.as_deref(), Some("alice"));
    }

    #[test]
    fn test_asset_protocol_order() {
        let asset = Asset {
            id: "a1".into(),
            name: "web-01".into(),
            address: "10.0.0.5".into(),
            protocols: vec![
                Protocol {
                    name: "ssh".into(),
                    port: 22,
                },
                Protocol {
                    name: "sftp".into(),
                    port: 22,
                },
            ],
            platform: Platform::default(),
            org_id: String::new(),
            org_name: String::new(),
            comment: String::new(),
        };
        assert_eq!(asset.support_protocols(), vec!["ssh", "sftp"]);
        assert!(asset.supports("sftp"));
        assert!(!asset.supports("rdp"));
    }

    #[test]
    fn test_connect_token_debug_hides_secret() {
        let token: ConnectToken = serde_json::from_str(
            r#"{
                "id": "tok1",
                "value": "token-value",
                "user": {"id": "u1"},
                "asset": {"id": "a1", "name": "web-01", "address": "10.0.0.5"},
                "account": {"name": "root", "username": "root", "secret": "hunter2"},
                "protocol": "ssh",
                "expire_at": 4102444800
            }"#,
        )
        .unwrap();
        let debug = format!("{:?}", token);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("token-value"));
        assert!(!token.is_expired());
    }
}
