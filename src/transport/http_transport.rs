use std::time::Duration;

use http::header::{REFERER, USER_AGENT};
use http::HeaderMap;

use crate::config::{ServerConfig, UpstreamConfig};
use crate::error::BridgeError;
use crate::protocol::zai::encoder::AUTH_USER_AGENT;
use crate::protocol::zai::ZaiAuthResponse;
use crate::util::sanitize_upstream_error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    timeout: Duration,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, BridgeError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout);

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| BridgeError::Transport(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| BridgeError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// HTTP client for the upstream chat and auth endpoints.
pub struct HttpTransport {
    client: reqwest::Client,
    chat_url: String,
    auth_url: String,
    referer: String,
    static_token: Option<String>,
}

impl HttpTransport {
    /// Create a transport with connection pooling, timeouts and proxy settings from config.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] when the proxy URL is invalid or the
    /// client cannot be built.
    pub fn new(server: &ServerConfig, upstream: &UpstreamConfig) -> Result<Self, BridgeError> {
        let client = build_reqwest_client(
            server.http_pool_max_idle_per_host.max(1),
            Duration::from_secs(server.timeout),
            server.http_use_env_proxy,
            upstream.proxy.as_deref(),
        )?;
        Ok(Self {
            client,
            chat_url: upstream.chat_url(),
            auth_url: upstream.auth_url(),
            referer: format!("{}/", upstream.origin()),
            static_token: upstream
                .token
                .as_deref()
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string),
        })
    }

    #[must_use]
    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    /// Fetch an anonymous guest token from the upstream auth endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] on request failure and
    /// [`BridgeError::Upstream`] on a non-success status or a body without a token.
    pub async fn fetch_guest_token(&self) -> Result<String, BridgeError> {
        let response = self
            .client
            .get(&self.auth_url)
            .header(USER_AGENT, AUTH_USER_AGENT)
            .header(REFERER, &self.referer)
            .send()
            .await
            .map_err(|err| BridgeError::Transport(format!("Guest token request failed: {err}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| BridgeError::Transport(format!("Guest token read failed: {err}")))?;
        if !status.is_success() {
            return Err(BridgeError::Upstream {
                status: status.as_u16(),
                message: sanitize_upstream_error(&body),
            });
        }

        serde_json::from_slice::<ZaiAuthResponse>(&body)
            .ok()
            .and_then(|auth| auth.token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| BridgeError::Upstream {
                status: status.as_u16(),
                message: "auth response carried no token".to_string(),
            })
    }

    /// Bearer token for the next chat request: the configured token, else a
    /// fresh guest token, else empty (the upstream decides).
    pub async fn resolve_token(&self) -> String {
        if let Some(token) = &self.static_token {
            return token.clone();
        }
        match self.fetch_guest_token().await {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(error = %err, "guest token fetch failed; sending without token");
                String::new()
            }
        }
    }

    /// POST a chat body to the upstream. The caller reads the body as a stream.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] when the request cannot be executed.
    pub async fn send_chat(
        &self,
        headers: HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, BridgeError> {
        self.client
            .post(&self.chat_url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|err| BridgeError::Transport(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_uses_configured_endpoints() {
        let upstream = UpstreamConfig {
            base_url: "http://127.0.0.1:9/".to_string(),
            token: Some("  ".to_string()),
            ..UpstreamConfig::default()
        };
        let transport = HttpTransport::new(&ServerConfig::default(), &upstream).unwrap();
        assert_eq!(transport.chat_url(), "http://127.0.0.1:9/api/chat/completions");
        assert_eq!(transport.auth_url, "http://127.0.0.1:9/api/v1/auths/");
        assert_eq!(transport.referer, "http://127.0.0.1:9/");
        assert!(transport.static_token.is_none());
    }

    #[tokio::test]
    async fn static_token_skips_fetch() {
        let upstream = UpstreamConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            token: Some("fixed".to_string()),
            ..UpstreamConfig::default()
        };
        let transport = HttpTransport::new(&ServerConfig::default(), &upstream).unwrap();
        assert_eq!(transport.resolve_token().await, "fixed");
    }
}
