//! HTTP plumbing for the core API backend.
//!
//! Every request is sent exactly once. A failed call ends the negotiation
//! that issued it, so there is no retry loop here.

use crate::traits::{AuthConfig, BackendConfig, BackendError, BackendResult};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Thin reqwest wrapper that injects credentials and maps failures.
pub struct HttpClient {
    client: Client,
    config: BackendConfig,
}

impl HttpClient {
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        // TLS verification can only be turned off in debug builds.
        let verify_tls = if !config.verify_tls {
            #[cfg(debug_assertions)]
            {
                warn!(
                    base_url = %config.base_url,
                    backend = %config.name,
                    "TLS certificate verification DISABLED in development mode"
                );
                false
            }
            #[cfg(not(debug_assertions))]
            {
                warn!(
                    base_url = %config.base_url,
                    backend = %config.name,
                    "Attempted to disable TLS verification in a release build - ignored"
                );
                true
            }
        } else {
            true
        };

        let mut headers = reqwest::header::HeaderMap::new();
        for (key, value) in &config.headers {
            if let (Ok(name), Ok(val)) = (
                reqwest::header::HeaderName::try_from(key.as_str()),
                reqwest::header::HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(name, val);
            }
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!verify_tls)
            .default_headers(headers)
            .build()
            .map_err(|e| BackendError::ConfigError(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Joins `path` onto the base URL.
    ///
    /// Absolute URLs are accepted only on the base URL's origin, since every
    /// request carries the gateway credential.
    pub fn build_url(&self, path: &str) -> BackendResult<String> {
        if path.starts_with("http://") || path.starts_with("https://") {
            let target = parse_url(path)?;
            let base = parse_url(&self.config.base_url)?;
            if target.origin() != base.origin() {
                warn!(
                    url = %path,
                    base_url = %self.config.base_url,
                    "Refusing request outside the core API origin"
                );
                return Err(BackendError::ConfigError(format!(
                    "{} is outside the core API origin {}",
                    target.origin().ascii_serialization(),
                    base.origin().ascii_serialization()
                )));
            }
            return Ok(path.to_string());
        }
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(format!("{}/{}", base, path))
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> BackendResult<T> {
        let response = self.send(self.client.get(self.build_url(path)?)).await?;
        parse_json_response(response).await
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> BackendResult<R> {
        let request = self.client.post(self.build_url(path)?).json(body);
        let response = self.send(request).await?;
        parse_json_response(response).await
    }

    /// Sends a POST and hands back the response whatever its status.
    ///
    /// Callers that need the body of a 4xx answer use this instead of
    /// [`HttpClient::post_json`].
    pub async fn post_unchecked<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> BackendResult<Response> {
        let request = self.client.post(self.build_url(path)?).json(body);
        self.dispatch(request).await
    }

    /// Sends a request with a method given as text, as ticket endpoints are.
    pub async fn request(&self, method: &str, path: &str) -> BackendResult<Response> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|e| BackendError::ConfigError(format!("invalid method {}: {}", method, e)))?;
        let request = self.client.request(method, self.build_url(path)?);
        self.send(request).await
    }

    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let response = self.dispatch(request).await?;
        check_status(response).await
    }

    async fn dispatch(&self, request: RequestBuilder) -> BackendResult<Response> {
        let request = self.add_auth(request);
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(e.to_string())
            } else if e.is_connect() {
                BackendError::ConnectionFailed(e.to_string())
            } else {
                BackendError::RequestFailed(e.to_string())
            }
        })?;
        debug!(status = %response.status(), url = %response.url(), "Core API responded");
        Ok(response)
    }

    fn add_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth {
            AuthConfig::None => request,
            AuthConfig::AccessKey { key, header_name } => {
                request.header(header_name, key.expose_secret())
            }
            AuthConfig::BearerToken { token } => {
                request.header("Authorization", format!("Bearer {}", token.expose_secret()))
            }
        }
    }
}

fn parse_url(url: &str) -> BackendResult<Url> {
    Url::parse(url).map_err(|e| BackendError::ConfigError(format!("invalid url {}: {}", url, e)))
}

async fn check_status(response: Response) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED => Err(BackendError::AuthenticationFailed(
            "Unauthorized".to_string(),
        )),
        StatusCode::NOT_FOUND => Err(BackendError::NotFound(response.url().path().to_string())),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(BackendError::RequestFailed(format!(
                "status {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            )))
        }
    }
}

pub(crate) async fn parse_json_response<T: DeserializeOwned>(
    response: Response,
) -> BackendResult<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

    serde_json::from_str(&text).map_err(|e| {
        BackendError::InvalidResponse(format!(
            "Failed to parse response (status {}): {} - Body: {}",
            status,
            e,
            text.chars().take(500).collect::<String>()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url() {
        let client = HttpClient::new(BackendConfig::new("https://core.example.com/")).unwrap();
        assert_eq!(
            client.build_url("/api/v1/perms/").unwrap(),
            "https://core.example.com/api/v1/perms/"
        );
        assert_eq!(
            client
                .build_url("https://core.example.com:443/api/v1/tickets/1/")
                .unwrap(),
            "https://core.example.com:443/api/v1/tickets/1/"
        );
    }

    #[test]
    fn test_foreign_origin_is_refused() {
        let client = HttpClient::new(BackendConfig::new("https://core.example.com")).unwrap();
        for url in [
            "https://other.example.com/api/v1/tickets/1/",
            "http://core.example.com/api/v1/tickets/1/",
            "https://core.example.com:8443/api/v1/tickets/1/",
        ] {
            assert!(
                matches!(client.build_url(url), Err(BackendError::ConfigError(_))),
                "{} should be refused",
                url
            );
        }
    }

    #[tokio::test]
    async fn test_foreign_ticket_url_never_sent() {
        let mut config = BackendConfig::new("https://core.example.com");
        config.auth = AuthConfig::BearerToken {
            token: "core-secret".into(),
        };
        let client = HttpClient::new(config).unwrap();

        let result = client
            .request("GET", "https://attacker.example.net/api/v1/tickets/1/")
            .await;
        assert!(matches!(result, Err(BackendError::ConfigError(_))));
    }
}
