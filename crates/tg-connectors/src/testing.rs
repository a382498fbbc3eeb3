//! Fixtures shared by backend and broker tests.

use crate::models::{
    Account, Asset, ConnectAccount, ConnectToken, Platform, Protocol, ReviewTicket, TicketApi,
    TicketState, TicketStatus, TokenUser,
};
use crate::traits::{AuthConfig, BackendConfig};
use chrono::{Duration, Utc};
use std::collections::HashMap;

/// Creates a backend config pointing at `base_url` with no credentials.
pub fn test_backend_config(base_url: &str) -> BackendConfig {
    BackendConfig {
        name: "test-core-api".to_string(),
        base_url: base_url.to_string(),
        auth: AuthConfig::None,
        timeout_secs: 5,
        verify_tls: true,
        headers: HashMap::new(),
    }
}

/// Creates an asset reachable over the given protocols.
pub fn sample_asset(id: &str, protocols: &[&str]) -> Asset {
    Asset {
        id: id.to_string(),
        name: format!("asset-{}", id),
        address: "10.0.0.10".to_string(),
        protocols: protocols
            .iter()
            .map(|name| Protocol {
                name: name.to_string(),
                port: default_port(name),
            })
            .collect(),
        platform: Platform {
            id: 1,
            name: "Linux".to_string(),
        },
        org_id: "org-default".to_string(),
        org_name: "Default".to_string(),
        comment: String::new(),
    }
}

fn default_port(protocol: &str) -> u16 {
    match protocol {
        "ssh" | "sftp" => 22,
        "telnet" => 23,
        "rdp" => 3389,
        "mysql" | "mariadb" => 3306,
        "postgresql" => 5432,
        "redis" => 6379,
        _ => 0,
    }
}

pub fn sample_account(username: &str) -> Account {
    Account {
        id: format!("acc-{}", username),
        name: username.to_string(),
        username: username.to_string(),
        alias: username.to_string(),
        secret_type: "password".to_string(),
    }
}

/// Creates a review ticket with conventional endpoints.
pub fn sample_ticket(ticket_id: &str) -> ReviewTicket {
    ReviewTicket {
        ticket_id: ticket_id.to_string(),
        check_api: TicketApi {
            method: "GET".to_string(),
            url: format!("/api/v1/tickets/{}/status/", ticket_id),
        },
        close_api: TicketApi {
            method: "DELETE".to_string(),
            url: format!("/api/v1/tickets/{}/", ticket_id),
        },
        detail_url: format!("https://core.example.com/ui/tickets/{}", ticket_id),
        reviewers: vec!["reviewer".to_string()],
    }
}

pub fn ticket_status(ticket_id: &str, state: TicketState) -> TicketStatus {
    TicketStatus {
        ticket_id: ticket_id.to_string(),
        state,
        processor: None,
    }
}

/// Creates a resolved connect token valid for one hour.
pub fn sample_connect_token(id: &str, asset_id: &str, account: &Account) -> ConnectToken {
    ConnectToken {
        id: id.to_string(),
        value: format!("value-{}", id).into(),
        user: TokenUser {
            id: "user-1".to_string(),
            name: "Test User".to_string(),
            username: "tester".to_string(),
        },
        asset: sample_asset(asset_id, &["ssh"]),
        account: ConnectAccount {
            name: account.name.clone(),
            username: account.username.clone(),
            secret: "secret".into(),
            secret_type: account.secret_type.clone(),
        },
        protocol: "ssh".to_string(),
        connect_method: "ssh".to_string(),
        actions: vec!["connect".to_string()],
        expire_at: Utc::now() + Duration::hours(1),
    }
}
