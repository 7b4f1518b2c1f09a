//! Authorization: resolve the token and identity a request acts with.

use crate::client::SlackApi;
use crate::context::{PreAuthorizeContext, PreAuthorizeRequest};
use crate::error::AuthorizeError;
use crate::payload::{event_type, PayloadType};
use crate::response::AckResponse;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Placeholder for identity fields that do not apply.
pub const NOT_APPLICABLE: &str = "N/A";

/// Event types processed without a live installation.
pub const DEFAULT_SKIP_AUTHORIZE_EVENTS: [&str; 2] = ["app_uninstalled", "tokens_revoked"];

/// Token and identity resolved for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeResult {
    pub enterprise_id: Option<String>,
    pub team_id: Option<String>,
    pub team: Option<String>,
    pub url: Option<String>,
    pub bot_id: String,
    pub bot_user_id: String,
    pub bot_token: Option<String>,
    pub bot_scopes: Vec<String>,
    pub user_id: Option<String>,
    pub user: Option<String>,
    pub user_token: Option<String>,
    pub user_scopes: Option<Vec<String>>,
}

impl AuthorizeResult {
    pub fn for_bot(bot_id: &str, bot_user_id: &str, bot_token: &str) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            bot_user_id: bot_user_id.to_string(),
            bot_token: Some(bot_token.to_string()),
            ..Self::default()
        }
    }

    /// Result used for events that skip authorization. Identifiers come from
    /// the actor fields already in context; tokens are [`NOT_APPLICABLE`].
    pub fn skipped(context: &PreAuthorizeContext) -> Self {
        Self {
            enterprise_id: context.actor_enterprise_id.clone(),
            team_id: context.actor_team_id.clone(),
            team: context.actor_team_id.clone(),
            url: None,
            bot_id: NOT_APPLICABLE.into(),
            bot_user_id: NOT_APPLICABLE.into(),
            bot_token: Some(NOT_APPLICABLE.into()),
            bot_scopes: Vec::new(),
            user_id: context.actor_user_id.clone(),
            user: context.actor_user_id.clone(),
            user_token: Some(NOT_APPLICABLE.into()),
            user_scopes: Some(Vec::new()),
        }
    }
}

#[async_trait]
pub trait Authorize: Send + Sync {
    async fn authorize(&self, req: &PreAuthorizeRequest) -> Result<AuthorizeResult, AuthorizeError>;
}

/// True when this request bypasses the authorizer.
pub fn should_skip_authorize(req: &PreAuthorizeRequest, skip_events: &[String]) -> bool {
    req.payload_type == PayloadType::EventCallback
        && event_type(&req.body).is_some_and(|t| skip_events.iter().any(|s| s == t))
}

// ── Single workspace ──────────────────────────────────────────────────────────

/// Authorizer for an app installed in one workspace with a fixed bot token.
///
/// Runs `auth.test` once and reuses the result.
pub struct SingleTeamAuthorize {
    bot_token: String,
    client: Arc<dyn SlackApi>,
    resolved: OnceCell<AuthorizeResult>,
}

impl SingleTeamAuthorize {
    pub fn new(bot_token: impl Into<String>, client: Arc<dyn SlackApi>) -> Self {
        Self {
            bot_token: bot_token.into(),
            client,
            resolved: OnceCell::new(),
        }
    }

    async fn resolve(&self) -> Result<AuthorizeResult, AuthorizeError> {
        let auth = self.client.auth_test().await.map_err(|e| {
            AuthorizeError::Failed(format!("failed to call auth.test: {e}"))
        })?;
        let bot_id = auth.bot_id.clone().ok_or_else(|| {
            AuthorizeError::Failed("auth.test returned no bot_id; is this a bot token?".into())
        })?;
        let bot_user_id = auth
            .user_id
            .clone()
            .ok_or_else(|| AuthorizeError::Failed("auth.test returned no user_id".into()))?;
        tracing::info!(team_id = ?auth.team_id, %bot_id, "Slack: single-team authorize resolved");
        Ok(AuthorizeResult {
            enterprise_id: auth.enterprise_id,
            team_id: auth.team_id,
            team: auth.team,
            url: auth.url,
            bot_id,
            bot_user_id,
            bot_token: Some(self.bot_token.clone()),
            bot_scopes: auth.scopes,
            user_id: auth.user_id,
            user: auth.user,
            user_token: None,
            user_scopes: None,
        })
    }
}

#[async_trait]
impl Authorize for SingleTeamAuthorize {
    async fn authorize(&self, _req: &PreAuthorizeRequest) -> Result<AuthorizeResult, AuthorizeError> {
        self.resolved
            .get_or_try_init(|| self.resolve())
            .await
            .cloned()
    }
}

// ── Closures ──────────────────────────────────────────────────────────────────

pub struct FnAuthorize<F>(F);

/// Adapt an async closure over the pre-authorize context.
pub fn authorize_fn<F, Fut>(f: F) -> FnAuthorize<F>
where
    F: Fn(PreAuthorizeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AuthorizeResult, AuthorizeError>> + Send,
{
    FnAuthorize(f)
}

#[async_trait]
impl<F, Fut> Authorize for FnAuthorize<F>
where
    F: Fn(PreAuthorizeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AuthorizeResult, AuthorizeError>> + Send,
{
    async fn authorize(&self, req: &PreAuthorizeRequest) -> Result<AuthorizeResult, AuthorizeError> {
        (self.0)(req.context.clone()).await
    }
}

// ── Error hook ────────────────────────────────────────────────────────────────

/// Turns an authorization failure into a response, or hands the error back.
#[async_trait]
pub trait AuthorizeErrorHandler: Send + Sync {
    async fn handle(
        &self,
        error: AuthorizeError,
        req: &PreAuthorizeRequest,
    ) -> Result<AckResponse, AuthorizeError>;
}

#[async_trait]
impl<F> AuthorizeErrorHandler for F
where
    F: Fn(&AuthorizeError, &PreAuthorizeRequest) -> Option<AckResponse> + Send + Sync,
{
    async fn handle(
        &self,
        error: AuthorizeError,
        req: &PreAuthorizeRequest,
    ) -> Result<AckResponse, AuthorizeError> {
        match self(&error, req) {
            Some(response) => Ok(response),
            None => Err(error),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
