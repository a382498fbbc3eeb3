//! Seam to the component that carries an established session.

use crate::context::SessionContext;
use crate::i18n::Language;
use async_trait::async_trait;
use std::sync::Arc;
use tg_connectors::{ConnectToken, IdentityBackend};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while constructing a session proxy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    #[error("Proxy setup failed: {0}")]
    Setup(String),
}

/// Everything a proxy needs to open the remote session.
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub auth_info: ConnectToken,
    pub language: Language,
    pub connect_method: String,
    pub session_id: Uuid,
}

impl ProxyOptions {
    pub fn new(auth_info: ConnectToken) -> Self {
        let connect_method = auth_info.connect_method.clone();
        Self {
            auth_info,
            language: Language::default(),
            connect_method,
            session_id: Uuid::new_v4(),
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_connect_method(mut self, method: impl Into<String>) -> Self {
        self.connect_method = method.into();
        self
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn protocol(&self) -> &str {
        &self.auth_info.protocol
    }
}

/// A constructed, not yet running, session.
#[async_trait]
pub trait SessionProxy: Send {
    /// Carries the session until either side closes it.
    async fn run(self: Box<Self>);
}

/// Builds session proxies.
pub trait SessionProxyFactory: Send + Sync {
    fn create(
        &self,
        ctx: &SessionContext,
        backend: Arc<dyn IdentityBackend>,
        options: ProxyOptions,
    ) -> Result<Box<dyn SessionProxy>, ProxyError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_connectors::testing::{sample_account, sample_connect_token};

    #[test]
    fn test_options_default_to_token_method() {
        let token = sample_connect_token("ct-1", "asset-1", &sample_account("root"));
        let options = ProxyOptions::new(token).with_language(Language::Ja);
        assert_eq!(options.connect_method, "ssh");
        assert_eq!(options.protocol(), "ssh");
        assert_eq!(options.language, Language::Ja);
    }

    #[test]
    fn test_builder_overrides() {
        let token = sample_connect_token("ct-1", "asset-1", &sample_account("root"));
        let id = Uuid::new_v4();
        let options = ProxyOptions::new(token)
            .with_connect_method("web_cli")
            .with_session_id(id);
        assert_eq!(options.connect_method, "web_cli");
        assert_eq!(options.session_id, id);
    }
}
