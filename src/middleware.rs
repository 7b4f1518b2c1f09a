//! Pre- and post-authorize middleware.
//!
//! Chains run strictly in order. The first middleware that returns a response
//! ends the request: later middleware, matching and listeners never run.

use crate::context::{PreAuthorizeRequest, SlackRequest};
use crate::payload::PayloadType;
use crate::response::{AckResponse, SlackResponse};
use async_trait::async_trait;
use serde_json::Value;

/// Event types that reach listeners even when the app itself caused them.
pub const DEFAULT_SELF_EVENT_KEEP_TYPES: [&str; 2] =
    ["member_joined_channel", "member_left_channel"];

#[async_trait]
pub trait PreAuthorizeMiddleware: Send + Sync {
    /// `Some` stops the request with that response.
    async fn handle(&self, req: &mut PreAuthorizeRequest) -> anyhow::Result<Option<AckResponse>>;
}

#[async_trait]
pub trait Middleware: Send + Sync {
    /// `Some` stops the request with that response.
    async fn handle(&self, req: &mut SlackRequest) -> anyhow::Result<Option<AckResponse>>;
}

// ── Closure adapters ──────────────────────────────────────────────────────────

pub struct FnPreAuthorize<F>(F);

pub fn pre_authorize_fn<F>(f: F) -> FnPreAuthorize<F>
where
    F: Fn(&mut PreAuthorizeRequest) -> anyhow::Result<Option<AckResponse>> + Send + Sync,
{
    FnPreAuthorize(f)
}

#[async_trait]
impl<F> PreAuthorizeMiddleware for FnPreAuthorize<F>
where
    F: Fn(&mut PreAuthorizeRequest) -> anyhow::Result<Option<AckResponse>> + Send + Sync,
{
    async fn handle(&self, req: &mut PreAuthorizeRequest) -> anyhow::Result<Option<AckResponse>> {
        (self.0)(req)
    }
}

pub struct FnMiddleware<F>(F);

pub fn middleware_fn<F>(f: F) -> FnMiddleware<F>
where
    F: Fn(&mut SlackRequest) -> anyhow::Result<Option<AckResponse>> + Send + Sync,
{
    FnMiddleware(f)
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut SlackRequest) -> anyhow::Result<Option<AckResponse>> + Send + Sync,
{
    async fn handle(&self, req: &mut SlackRequest) -> anyhow::Result<Option<AckResponse>> {
        (self.0)(req)
    }
}

// ── Built-ins ─────────────────────────────────────────────────────────────────

/// Answers the Events API `url_verification` handshake with its challenge.
pub struct UrlVerification;

#[async_trait]
impl PreAuthorizeMiddleware for UrlVerification {
    async fn handle(&self, req: &mut PreAuthorizeRequest) -> anyhow::Result<Option<AckResponse>> {
        if req.payload_type != PayloadType::UrlVerification {
            return Ok(None);
        }
        let challenge = req
            .body
            .get("challenge")
            .and_then(Value::as_str)
            .unwrap_or_default();
        tracing::info!("Slack: answering url_verification challenge");
        Ok(Some(SlackResponse::new(200).with_text(challenge).into()))
    }
}

/// Drops events the app caused itself so replies cannot loop.
pub struct IgnoringSelfEvents {
    keep_event_types: Vec<String>,
    pass_assistant_dm_echoes: bool,
}

impl IgnoringSelfEvents {
    pub fn new(keep_event_types: Vec<String>) -> Self {
        Self {
            keep_event_types,
            pass_assistant_dm_echoes: false,
        }
    }

    /// Let the app's own direct messages through to an assistant listener
    /// that handles bot messages.
    pub fn pass_assistant_dm_echoes(mut self, pass: bool) -> Self {
        self.pass_assistant_dm_echoes = pass;
        self
    }
}

impl Default for IgnoringSelfEvents {
    fn default() -> Self {
        Self::new(
            DEFAULT_SELF_EVENT_KEEP_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }
}

/// The event was produced by this app's bot.
pub fn is_self_event(req: &SlackRequest) -> bool {
    let Some(event) = req.body.get("event") else {
        return false;
    };
    let auth = &req.context.authorize_result;
    let bot_id_matches = event.get("bot_id").and_then(Value::as_str) == Some(auth.bot_id.as_str());
    let user_matches = req.context.user_id.as_deref() == Some(auth.bot_user_id.as_str());
    bot_id_matches || user_matches
}

#[async_trait]
impl Middleware for IgnoringSelfEvents {
    async fn handle(&self, req: &mut SlackRequest) -> anyhow::Result<Option<AckResponse>> {
        let Some(event) = req.body.get("event") else {
            return Ok(None);
        };
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();
        if self.keep_event_types.iter().any(|t| t == event_type) {
            return Ok(None);
        }
        if !is_self_event(req) {
            return Ok(None);
        }
        if self.pass_assistant_dm_echoes
            && event_type == "message"
            && event.get("channel_type").and_then(Value::as_str) == Some("im")
        {
            return Ok(None);
        }
        tracing::debug!(event_type, "Slack: ignoring self event");
        Ok(Some(SlackResponse::new(200).with_text("").into()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
