//! Minimal Slack Web API capability.
//!
//! The dispatch core only needs "given a token, produce a client that can post
//! messages and run `auth.test`". Everything else goes through [`SlackApi::call`].

use crate::error::ApiError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://slack.com/api";

/// Shared HTTP client. Reusing it enables TCP/TLS connection pooling.
static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_default()
});

/// Result of `auth.test`, including the granted scopes from `x-oauth-scopes`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthTest {
    pub url: Option<String>,
    pub team: Option<String>,
    pub team_id: Option<String>,
    pub enterprise_id: Option<String>,
    pub user: Option<String>,
    pub user_id: Option<String>,
    pub bot_id: Option<String>,
    pub scopes: Vec<String>,
}

impl AuthTest {
    fn from_response(body: &Value, scopes_header: Option<&str>) -> Self {
        let field = |key: &str| body.get(key).and_then(Value::as_str).map(String::from);
        Self {
            url: field("url"),
            team: field("team"),
            team_id: field("team_id"),
            enterprise_id: field("enterprise_id"),
            user: field("user"),
            user_id: field("user_id"),
            bot_id: field("bot_id"),
            scopes: split_scopes(scopes_header.unwrap_or_default()),
        }
    }
}

fn split_scopes(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
pub trait SlackApi: Send + Sync {
    /// Call a Web API method with a JSON body. `ok: false` is an error.
    async fn call(&self, method: &str, params: Value) -> Result<Value, ApiError>;

    async fn auth_test(&self) -> Result<AuthTest, ApiError>;

    async fn post_message(&self, params: Value) -> Result<Value, ApiError> {
        self.call("chat.postMessage", params).await
    }
}

/// Produces a client bound to a token.
pub trait ApiClientFactory: Send + Sync {
    fn client(&self, token: Option<&str>) -> Arc<dyn SlackApi>;
}

// ── reqwest implementation ────────────────────────────────────────────────────

/// Web API client over HTTPS.
#[derive(Clone)]
pub struct HttpSlackApi {
    base_url: String,
    token: Option<String>,
}

impl HttpSlackApi {
    pub fn new(token: Option<String>) -> Self {
        Self::with_base_url(DEFAULT_API_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn send(&self, method: &str, params: &Value) -> Result<reqwest::Response, ApiError> {
        let mut req = HTTP_CLIENT
            .post(format!("{}/{method}", self.base_url))
            .json(params);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|source| ApiError::Http {
            method: method.to_string(),
            source,
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
            return Err(ApiError::Status {
                method: method.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

async fn read_ok_body(method: &str, resp: reqwest::Response) -> Result<Value, ApiError> {
    let body: Value = resp.json().await.map_err(|source| ApiError::Http {
        method: method.to_string(),
        source,
    })?;
    // Slack returns 200 for most app-level errors; check JSON "ok" field
    if body.get("ok") != Some(&Value::Bool(true)) {
        let error = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        return Err(ApiError::Platform {
            method: method.to_string(),
            error,
        });
    }
    Ok(body)
}

#[async_trait]
impl SlackApi for HttpSlackApi {
    async fn call(&self, method: &str, params: Value) -> Result<Value, ApiError> {
        let resp = self.send(method, &params).await?;
        read_ok_body(method, resp).await
    }

    async fn auth_test(&self) -> Result<AuthTest, ApiError> {
        let resp = self.send("auth.test", &Value::Object(Default::default())).await?;
        let scopes = resp
            .headers()
            .get("x-oauth-scopes")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = read_ok_body("auth.test", resp).await?;
        Ok(AuthTest::from_response(&body, scopes.as_deref()))
    }
}

/// Builds [`HttpSlackApi`] clients against one base URL.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    base_url: String,
}

impl HttpClientFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL)
    }
}

impl ApiClientFactory for HttpClientFactory {
    fn client(&self, token: Option<&str>) -> Arc<dyn SlackApi> {
        Arc::new(HttpSlackApi::with_base_url(
            &self.base_url,
            token.map(String::from),
        ))
    }
}

// ── response_url ──────────────────────────────────────────────────────────────

/// POST a message payload to an interaction's `response_url`.
///
/// These webhooks answer with plain `ok` text rather than the usual JSON
/// envelope, so only the HTTP status is checked.
pub async fn send_to_response_url(url: &str, params: &Value) -> Result<(), ApiError> {
    let resp = HTTP_CLIENT
        .post(url)
        .json(params)
        .send()
        .await
        .map_err(|source| ApiError::Http {
            method: "response_url".into(),
            source,
        })?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            method: "response_url".into(),
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
