//! Request context derivation.
//!
//! Every derived field has its own pure extractor over the parsed document.
//! [`PreAuthorizeContext::from_body`] composes them; [`SlackContext`] adds the
//! resolved identity and the capabilities that depend on which fields exist.

use crate::assistant::{AssistantUtilities, CONTEXT_EVENT_TYPE};
use crate::authorize::AuthorizeResult;
use crate::client::{send_to_response_url, SlackApi};
use crate::error::ApiError;
use crate::payload::PayloadType;
use axum::http::HeaderMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

// ── Field access helpers ──────────────────────────────────────────────────────

/// Non-empty string at `key`.
fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// `key` given either as a bare string or as an object carrying `id`.
fn id_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    match v.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s),
        obj @ Value::Object(_) => str_field(obj, "id"),
        _ => None,
    }
}

fn first_authorization(body: &Value) -> Option<&Value> {
    body.get("authorizations")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
}

fn owned(s: Option<&str>) -> Option<String> {
    s.map(String::from)
}

fn is_event_callback(body: &Value) -> bool {
    body.get("type").and_then(Value::as_str) == Some("event_callback")
}

/// Event callback delivered through a channel shared with another organization.
fn is_ext_shared_event(body: &Value) -> bool {
    body.get("is_ext_shared_channel").and_then(Value::as_bool) == Some(true)
        && is_event_callback(body)
}

// ── Identity extractors ───────────────────────────────────────────────────────

pub fn extract_is_enterprise_install(body: &Value) -> Option<bool> {
    if let Some(auth) = first_authorization(body) {
        return auth.get("is_enterprise_install").and_then(Value::as_bool);
    }
    match body.get("is_enterprise_install")? {
        Value::Bool(b) => Some(*b),
        // slash commands send form fields as strings
        Value::String(s) => Some(s == "true"),
        _ => None,
    }
}

pub fn extract_enterprise_id(body: &Value) -> Option<String> {
    owned(id_field(body, "enterprise"))
        .or_else(|| first_authorization(body).and_then(extract_enterprise_id))
        .or_else(|| owned(str_field(body, "enterprise_id")))
        .or_else(|| {
            body.get("team")
                .filter(|t| t.is_object())
                .and_then(|t| owned(str_field(t, "enterprise_id")))
        })
        .or_else(|| body.get("event").and_then(extract_enterprise_id))
}

pub fn extract_team_id(body: &Value) -> Option<String> {
    let view = body.get("view");
    owned(view.and_then(|v| str_field(v, "app_installed_team_id")))
        .or_else(|| owned(id_field(body, "team")))
        .or_else(|| first_authorization(body).and_then(|a| owned(str_field(a, "team_id"))))
        .or_else(|| owned(str_field(body, "team_id")))
        .or_else(|| {
            body.get("user")
                .filter(|u| u.is_object())
                .and_then(|u| owned(str_field(u, "team_id")))
        })
        .or_else(|| owned(view.and_then(|v| str_field(v, "team_id"))))
}

pub fn extract_user_id(body: &Value) -> Option<String> {
    owned(id_field(body, "user"))
        .or_else(|| owned(str_field(body, "user_id")))
        .or_else(|| body.get("event").and_then(extract_user_id))
        .or_else(|| body.get("message").and_then(extract_user_id))
        .or_else(|| body.get("previous_message").and_then(extract_user_id))
}

// ── Actor identity ────────────────────────────────────────────────────────────
//
// In a channel shared across organizations the acting user may belong to a
// different workspace than the installation receiving the event.

pub fn extract_actor_enterprise_id(body: &Value) -> Option<String> {
    if is_ext_shared_event(body) {
        let event = body.get("event");
        let event_team = event
            .and_then(|e| str_field(e, "user_team"))
            .or_else(|| event.and_then(|e| str_field(e, "team")));
        if let Some(team) = event_team {
            if team.starts_with('E') {
                return Some(team.to_string());
            }
            if Some(team) == str_field(body, "team_id") {
                return owned(str_field(body, "enterprise_id"));
            }
        }
    }
    extract_enterprise_id(body)
}

pub fn extract_actor_team_id(body: &Value) -> Option<String> {
    if is_ext_shared_event(body) {
        if let Some(event) = body.get("event") {
            if str_field(event, "type") == Some("app_mention") {
                // A grid-connected workspace reports an enterprise id here; the
                // team cannot be resolved from the payload alone.
                return match str_field(event, "user_team") {
                    None => owned(str_field(event, "team")),
                    Some(team) if team.starts_with('T') => Some(team.to_string()),
                    Some(_) => None,
                };
            }
            for key in ["user_team", "team"] {
                let Some(team) = str_field(event, key) else {
                    continue;
                };
                if team.starts_with('T') {
                    return Some(team.to_string());
                }
                if team.starts_with('E') {
                    if Some(team) == str_field(body, "enterprise_id") {
                        return owned(str_field(body, "team_id"));
                    }
                    if Some(team) == str_field(body, "context_enterprise_id") {
                        return owned(str_field(body, "context_team_id"));
                    }
                }
            }
        }
    }
    extract_team_id(body)
}

pub fn extract_actor_user_id(body: &Value) -> Option<String> {
    if is_ext_shared_event(body) {
        let event = body.get("event")?;
        if extract_actor_enterprise_id(body).is_none() && extract_actor_team_id(body).is_none() {
            // Unknown organization: do not hand out a user id that may be misattributed.
            return None;
        }
        return owned(str_field(event, "user").or_else(|| str_field(event, "user_id")));
    }
    extract_user_id(body)
}

// ── Routing extractors ────────────────────────────────────────────────────────

pub fn extract_response_url(body: &Value) -> Option<String> {
    owned(str_field(body, "response_url")).or_else(|| {
        body.get("response_urls")
            .and_then(Value::as_array)
            .and_then(|urls| urls.first())
            .and_then(|u| owned(str_field(u, "response_url")))
    })
}

pub fn extract_channel_id(body: &Value) -> Option<String> {
    owned(id_field(body, "channel"))
        .or_else(|| owned(str_field(body, "channel_id")))
        .or_else(|| body.get("event").and_then(extract_channel_id))
        .or_else(|| body.get("item").and_then(extract_channel_id))
        .or_else(|| body.get("assistant_thread").and_then(extract_channel_id))
}

/// Event callbacks that belong to an assistant thread: thread lifecycle events
/// and direct messages.
pub fn is_assistant_thread_event(body: &Value) -> bool {
    if !is_event_callback(body) {
        return false;
    }
    let Some(event) = body.get("event") else {
        return false;
    };
    match str_field(event, "type") {
        Some("assistant_thread_started" | "assistant_thread_context_changed") => true,
        Some("message") => str_field(event, "channel_type") == Some("im"),
        _ => false,
    }
}

/// Thread timestamp for assistant-thread events only.
pub fn extract_thread_ts(body: &Value) -> Option<String> {
    if !is_assistant_thread_event(body) {
        return None;
    }
    let event = body.get("event")?;
    if let Some(ts) = event.pointer("/assistant_thread/thread_ts").and_then(Value::as_str) {
        return Some(ts.to_string());
    }
    event.get("channel")?;
    owned(str_field(event, "thread_ts"))
        // message_changed
        .or_else(|| owned(event.pointer("/message/thread_ts").and_then(Value::as_str)))
        // message_deleted
        .or_else(|| owned(event.pointer("/previous_message/thread_ts").and_then(Value::as_str)))
}

pub fn extract_trigger_id(body: &Value) -> Option<String> {
    owned(str_field(body, "trigger_id")).or_else(|| {
        owned(
            body.pointer("/interactivity/interactivity_pointer")
                .and_then(Value::as_str),
        )
    })
}

pub fn extract_function_execution_id(body: &Value) -> Option<String> {
    if let Some(event) = body.get("event") {
        return extract_function_execution_id(event);
    }
    owned(str_field(body, "function_execution_id")).or_else(|| {
        owned(
            body.pointer("/function_data/execution_id")
                .and_then(Value::as_str),
        )
    })
}

pub fn extract_function_bot_access_token(body: &Value) -> Option<String> {
    if let Some(event) = body.get("event") {
        return extract_function_bot_access_token(event);
    }
    owned(str_field(body, "bot_access_token"))
}

// ── Pre-authorize context ─────────────────────────────────────────────────────

/// Fields known before any token is resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreAuthorizeContext {
    pub is_enterprise_install: Option<bool>,
    pub enterprise_id: Option<String>,
    pub team_id: Option<String>,
    pub user_id: Option<String>,
    pub actor_enterprise_id: Option<String>,
    pub actor_team_id: Option<String>,
    pub actor_user_id: Option<String>,
    pub response_url: Option<String>,
    pub channel_id: Option<String>,
    pub thread_ts: Option<String>,
    pub is_assistant_thread_event: bool,
    pub trigger_id: Option<String>,
    pub function_execution_id: Option<String>,
    pub function_bot_access_token: Option<String>,
    pub retry_num: Option<u32>,
    pub retry_reason: Option<String>,
    /// Free-form values set by middleware.
    pub custom: HashMap<String, Value>,
}

impl PreAuthorizeContext {
    pub fn from_body(body: &Value) -> Self {
        Self {
            is_enterprise_install: extract_is_enterprise_install(body),
            enterprise_id: extract_enterprise_id(body),
            team_id: extract_team_id(body),
            user_id: extract_user_id(body),
            actor_enterprise_id: extract_actor_enterprise_id(body),
            actor_team_id: extract_actor_team_id(body),
            actor_user_id: extract_actor_user_id(body),
            response_url: extract_response_url(body),
            channel_id: extract_channel_id(body),
            thread_ts: extract_thread_ts(body),
            is_assistant_thread_event: is_assistant_thread_event(body),
            trigger_id: extract_trigger_id(body),
            function_execution_id: extract_function_execution_id(body),
            function_bot_access_token: extract_function_bot_access_token(body),
            retry_num: None,
            retry_reason: None,
            custom: HashMap::new(),
        }
    }
}

// ── Authorized context ────────────────────────────────────────────────────────

/// Context handed to post-authorize middleware and listeners.
#[derive(Clone)]
pub struct SlackContext {
    base: PreAuthorizeContext,
    pub authorize_result: AuthorizeResult,
    pub bot_token: Option<String>,
    pub bot_id: String,
    pub bot_user_id: String,
    pub user_token: Option<String>,
    /// Client bound to the function token when present, else the bot token.
    pub client: Arc<dyn SlackApi>,
    assistant: Option<AssistantUtilities>,
}

impl SlackContext {
    pub fn new(
        base: PreAuthorizeContext,
        authorize_result: AuthorizeResult,
        client: Arc<dyn SlackApi>,
    ) -> Self {
        Self {
            bot_token: authorize_result.bot_token.clone(),
            bot_id: authorize_result.bot_id.clone(),
            bot_user_id: authorize_result.bot_user_id.clone(),
            user_token: authorize_result.user_token.clone(),
            base,
            authorize_result,
            client,
            assistant: None,
        }
    }

    pub(crate) fn with_assistant(mut self, utilities: AssistantUtilities) -> Self {
        self.assistant = Some(utilities);
        self
    }

    /// Token used for the bound client.
    pub fn primary_token(&self) -> Option<&str> {
        self.base
            .function_bot_access_token
            .as_deref()
            .or(self.bot_token.as_deref())
    }

    /// Post to the request's channel. `None` when no channel id was found.
    pub fn say(&self) -> Option<Say> {
        let channel = self.base.channel_id.clone()?;
        let metadata = self
            .assistant
            .as_ref()
            .and_then(AssistantUtilities::thread_context)
            .map(|ctx| {
                json!({
                    "event_type": CONTEXT_EVENT_TYPE,
                    "event_payload": ctx,
                })
            });
        Some(Say {
            client: Arc::clone(&self.client),
            channel,
            thread_ts: self.base.thread_ts.clone(),
            metadata,
        })
    }

    /// Reply through `response_url`. `None` when the payload carried none.
    pub fn respond(&self) -> Option<Respond> {
        self.base.response_url.clone().map(|url| Respond { url })
    }

    /// Assistant thread helpers, present for assistant-thread events with
    /// both a channel and a thread.
    pub fn assistant(&self) -> Option<&AssistantUtilities> {
        self.assistant.as_ref()
    }
}

impl Deref for SlackContext {
    type Target = PreAuthorizeContext;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl DerefMut for SlackContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl fmt::Debug for SlackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackContext")
            .field("base", &self.base)
            .field("bot_id", &self.bot_id)
            .field("bot_user_id", &self.bot_user_id)
            .field("has_user_token", &self.user_token.is_some())
            .field("assistant", &self.assistant.is_some())
            .finish_non_exhaustive()
    }
}

/// Merge `params` over `base`; keys in `params` win.
fn merge_params(mut base: Map<String, Value>, params: Value) -> Value {
    match params {
        Value::Object(extra) => base.extend(extra),
        Value::String(text) => {
            base.insert("text".into(), Value::String(text));
        }
        _ => {}
    }
    Value::Object(base)
}

/// `chat.postMessage` bound to the request's channel.
#[derive(Clone)]
pub struct Say {
    client: Arc<dyn SlackApi>,
    channel: String,
    thread_ts: Option<String>,
    metadata: Option<Value>,
}

impl Say {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Post a message. `params` is a `chat.postMessage` body without `channel`,
    /// or a bare string used as `text`.
    pub async fn send(&self, params: impl Into<Value>) -> Result<Value, ApiError> {
        let mut base = Map::new();
        base.insert("channel".into(), Value::String(self.channel.clone()));
        if let Some(ts) = &self.thread_ts {
            base.insert("thread_ts".into(), Value::String(ts.clone()));
        }
        if let Some(metadata) = &self.metadata {
            base.insert("metadata".into(), metadata.clone());
        }
        self.client.post_message(merge_params(base, params.into())).await
    }
}

/// Sender for an interaction's `response_url`.
#[derive(Debug, Clone)]
pub struct Respond {
    url: String,
}

impl Respond {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send(&self, params: impl Into<Value>) -> Result<(), ApiError> {
        let body = merge_params(Map::new(), params.into());
        send_to_response_url(&self.url, &body).await
    }
}

// ── Requests seen by middleware and listeners ─────────────────────────────────

/// Request before authorization. Pre-authorize middleware may edit `context`.
#[derive(Debug, Clone)]
pub struct PreAuthorizeRequest {
    pub body: Arc<Value>,
    pub raw_body: Arc<str>,
    pub headers: Arc<HeaderMap>,
    pub payload_type: PayloadType,
    pub context: PreAuthorizeContext,
}

/// Authorized request. Cheap to clone; the lazy phase receives its own copy.
#[derive(Debug, Clone)]
pub struct SlackRequest {
    pub body: Arc<Value>,
    pub raw_body: Arc<str>,
    pub headers: Arc<HeaderMap>,
    pub payload_type: PayloadType,
    pub context: Arc<SlackContext>,
}

impl SlackRequest {
    /// The inner `event` for event callbacks, the whole document otherwise.
    pub fn payload(&self) -> &Value {
        match self.payload_type {
            PayloadType::EventCallback => self.body.get("event").unwrap_or(&self.body),
            _ => &self.body,
        }
    }

    pub fn context_mut(&mut self) -> &mut SlackContext {
        Arc::make_mut(&mut self.context)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingApi;

    fn ext_shared_event(event: Value) -> Value {
        json!({
            "type": "event_callback",
            "team_id": "T_INSTALLED",
            "enterprise_id": "E_INSTALLED",
            "context_team_id": "T_CONTEXT",
            "context_enterprise_id": "E_CONTEXT",
            "is_ext_shared_channel": true,
            "event": event,
        })
    }

    // ── enterprise install ───────────────────────────────────────

    #[test]
    fn enterprise_install_prefers_authorizations() {
        let body = json!({
            "authorizations": [{"is_enterprise_install": true}],
            "is_enterprise_install": false,
        });
        assert_eq!(extract_is_enterprise_install(&body), Some(true));
    }

    #[test]
    fn enterprise_install_from_slash_command_string() {
        assert_eq!(
            extract_is_enterprise_install(&json!({"is_enterprise_install": "true"})),
            Some(true)
        );
        assert_eq!(
            extract_is_enterprise_install(&json!({"is_enterprise_install": "false"})),
            Some(false)
        );
        assert_eq!(extract_is_enterprise_install(&json!({})), None);
    }

    // ── team / enterprise / user ─────────────────────────────────

    #[test]
    fn team_id_precedence() {
        let full = json!({
            "view": {"app_installed_team_id": "T_VIEW_INSTALLED", "team_id": "T_VIEW"},
            "team": {"id": "T_OBJ"},
            "team_id": "T_FLAT",
        });
        assert_eq!(extract_team_id(&full).as_deref(), Some("T_VIEW_INSTALLED"));
        assert_eq!(
            extract_team_id(&json!({"team": "T_STR", "team_id": "T_FLAT"})).as_deref(),
            Some("T_STR")
        );
        assert_eq!(
            extract_team_id(&json!({"authorizations": [{"team_id": "T_AUTH"}], "team_id": "T_FLAT"}))
                .as_deref(),
            Some("T_AUTH")
        );
        assert_eq!(
            extract_team_id(&json!({"team_id": "T_FLAT"})).as_deref(),
            Some("T_FLAT")
        );
        assert_eq!(
            extract_team_id(&json!({"user": {"id": "U1", "team_id": "T_USER"}})).as_deref(),
            Some("T_USER")
        );
        assert_eq!(
            extract_team_id(&json!({"view": {"team_id": "T_VIEW"}})).as_deref(),
            Some("T_VIEW")
        );
        assert_eq!(extract_team_id(&json!({})), None);
    }

    #[test]
    fn enterprise_id_precedence() {
        assert_eq!(
            extract_enterprise_id(&json!({"enterprise": {"id": "E_OBJ"}, "enterprise_id": "E_FLAT"}))
                .as_deref(),
            Some("E_OBJ")
        );
        assert_eq!(
            extract_enterprise_id(&json!({"authorizations": [{"enterprise_id": "E_AUTH"}]})).as_deref(),
            Some("E_AUTH")
        );
        assert_eq!(
            extract_enterprise_id(&json!({"team": {"id": "T1", "enterprise_id": "E_TEAM"}})).as_deref(),
            Some("E_TEAM")
        );
        assert_eq!(
            extract_enterprise_id(&json!({"event": {"enterprise": "E_EVENT"}})).as_deref(),
            Some("E_EVENT")
        );
    }

    #[test]
    fn authorizations_without_enterprise_fall_through() {
        let body = json!({
            "authorizations": [{"enterprise_id": null, "team_id": "T1"}],
            "enterprise_id": "E_FLAT",
        });
        assert_eq!(extract_enterprise_id(&body).as_deref(), Some("E_FLAT"));
    }

    #[test]
    fn user_id_precedence() {
        assert_eq!(
            extract_user_id(&json!({"user": {"id": "U_OBJ"}, "user_id": "U_FLAT"})).as_deref(),
            Some("U_OBJ")
        );
        assert_eq!(
            extract_user_id(&json!({"user_id": "U_FLAT"})).as_deref(),
            Some("U_FLAT")
        );
        assert_eq!(
            extract_user_id(&json!({"event": {"user": "U_EVENT"}})).as_deref(),
            Some("U_EVENT")
        );
        assert_eq!(
            extract_user_id(&json!({"event": {"type": "message", "subtype": "message_changed",
                "message": {"user": "U_EDITED"}}}))
            .as_deref(),
            Some("U_EDITED")
        );
        assert_eq!(
            extract_user_id(&json!({"event": {"previous_message": {"user": "U_DELETED"}}})).as_deref(),
            Some("U_DELETED")
        );
    }

    // ── actor identity ───────────────────────────────────────────

    #[test]
    fn actor_matches_team_context_outside_shared_channels() {
        let body = json!({
            "type": "event_callback",
            "team_id": "T1",
            "enterprise_id": "E1",
            "event": {"type": "message", "user": "U1", "user_team": "T_OTHER"},
        });
        assert_eq!(extract_actor_team_id(&body).as_deref(), Some("T1"));
        assert_eq!(extract_actor_enterprise_id(&body).as_deref(), Some("E1"));
        assert_eq!(extract_actor_user_id(&body).as_deref(), Some("U1"));
    }

    #[test]
    fn actor_team_from_user_team_in_shared_channel() {
        let body = ext_shared_event(json!({
            "type": "message", "user": "U_EXT", "user_team": "T_EXT", "team": "T_INSTALLED",
        }));
        assert_eq!(extract_actor_team_id(&body).as_deref(), Some("T_EXT"));
        assert_eq!(extract_actor_user_id(&body).as_deref(), Some("U_EXT"));
    }

    #[test]
    fn actor_enterprise_from_enterprise_shaped_user_team() {
        let body = ext_shared_event(json!({
            "type": "message", "user": "U_EXT", "user_team": "E_EXT",
        }));
        assert_eq!(extract_actor_enterprise_id(&body).as_deref(), Some("E_EXT"));
    }

    #[test]
    fn actor_enterprise_when_event_team_is_installed_team() {
        let body = ext_shared_event(json!({
            "type": "message", "user": "U1", "user_team": "T_INSTALLED",
        }));
        assert_eq!(extract_actor_enterprise_id(&body).as_deref(), Some("E_INSTALLED"));
    }

    #[test]
    fn actor_team_maps_enterprise_ids_to_known_teams() {
        let installed = ext_shared_event(json!({"type": "message", "user_team": "E_INSTALLED"}));
        assert_eq!(extract_actor_team_id(&installed).as_deref(), Some("T_INSTALLED"));

        let context = ext_shared_event(json!({"type": "message", "team": "E_CONTEXT"}));
        assert_eq!(extract_actor_team_id(&context).as_deref(), Some("T_CONTEXT"));
    }

    #[test]
    fn app_mention_from_grid_workspace_has_no_actor_team() {
        let body = ext_shared_event(json!({
            "type": "app_mention", "user": "U_EXT", "user_team": "E_GRID", "team": "T_INSTALLED",
        }));
        assert_eq!(extract_actor_team_id(&body), None);
    }

    #[test]
    fn app_mention_without_user_team_uses_event_team() {
        let body = ext_shared_event(json!({"type": "app_mention", "team": "T_EVENT"}));
        assert_eq!(extract_actor_team_id(&body).as_deref(), Some("T_EVENT"));
    }

    #[test]
    fn actor_user_withheld_when_actor_org_unresolved() {
        let body = json!({
            "type": "event_callback",
            "is_ext_shared_channel": true,
            "event": {"type": "app_mention", "user": "U_EXT", "user_team": "E_UNKNOWN"},
        });
        // The enterprise-shaped user_team resolves the actor enterprise.
        assert_eq!(extract_actor_user_id(&body).as_deref(), Some("U_EXT"));

        let unresolved = json!({
            "type": "event_callback",
            "is_ext_shared_channel": true,
            "event": {"type": "app_mention", "user": "U_EXT", "user_team": "X_UNKNOWN"},
        });
        assert_eq!(extract_actor_enterprise_id(&unresolved), None);
        assert_eq!(extract_actor_team_id(&unresolved), None);
        assert_eq!(extract_actor_user_id(&unresolved), None);
    }

    #[test]
    fn actor_user_none_without_event() {
        let body = json!({"type": "event_callback", "is_ext_shared_channel": true, "team_id": "T1"});
        assert_eq!(extract_actor_user_id(&body), None);
        assert_eq!(extract_actor_team_id(&body).as_deref(), Some("T1"));
    }

    // ── routing fields ───────────────────────────────────────────

    #[test]
    fn channel_id_sources() {
        assert_eq!(
            extract_channel_id(&json!({"channel": {"id": "C_OBJ"}})).as_deref(),
            Some("C_OBJ")
        );
        assert_eq!(
            extract_channel_id(&json!({"channel_id": "C_FLAT"})).as_deref(),
            Some("C_FLAT")
        );
        assert_eq!(
            extract_channel_id(&json!({"event": {"channel": "C_EVENT"}})).as_deref(),
            Some("C_EVENT")
        );
        assert_eq!(
            extract_channel_id(&json!({"event": {"type": "reaction_added",
                "item": {"type": "message", "channel": "C_ITEM"}}}))
            .as_deref(),
            Some("C_ITEM")
        );
        assert_eq!(
            extract_channel_id(&json!({"event": {"type": "assistant_thread_started",
                "assistant_thread": {"channel_id": "D_THREAD"}}}))
            .as_deref(),
            Some("D_THREAD")
        );
    }

    #[test]
    fn response_url_sources() {
        assert_eq!(
            extract_response_url(&json!({"response_url": "https://hooks.example/a"})).as_deref(),
            Some("https://hooks.example/a")
        );
        assert_eq!(
            extract_response_url(&json!({"response_urls": [{"response_url": "https://hooks.example/b"}]}))
                .as_deref(),
            Some("https://hooks.example/b")
        );
        assert_eq!(extract_response_url(&json!({"response_urls": []})), None);
    }

    #[test]
    fn trigger_id_sources() {
        assert_eq!(
            extract_trigger_id(&json!({"trigger_id": "tr1"})).as_deref(),
            Some("tr1")
        );
        assert_eq!(
            extract_trigger_id(&json!({"interactivity": {"interactivity_pointer": "ip1"}})).as_deref(),
            Some("ip1")
        );
    }

    #[test]
    fn function_fields() {
        let event = json!({"event": {"type": "function_executed",
            "function_execution_id": "Fx1", "bot_access_token": "xwfp-1"}});
        assert_eq!(extract_function_execution_id(&event).as_deref(), Some("Fx1"));
        assert_eq!(extract_function_bot_access_token(&event).as_deref(), Some("xwfp-1"));

        let action = json!({"type": "block_actions", "function_data": {"execution_id": "Fx2"},
            "bot_access_token": "xwfp-2"});
        assert_eq!(extract_function_execution_id(&action).as_deref(), Some("Fx2"));
        assert_eq!(extract_function_bot_access_token(&action).as_deref(), Some("xwfp-2"));
    }

    // ── assistant threads ────────────────────────────────────────

    #[test]
    fn assistant_thread_event_detection() {
        let started = json!({"type": "event_callback", "event": {"type": "assistant_thread_started"}});
        let dm = json!({"type": "event_callback", "event": {"type": "message", "channel_type": "im"}});
        let channel_msg =
            json!({"type": "event_callback", "event": {"type": "message", "channel_type": "channel"}});
        assert!(is_assistant_thread_event(&started));
        assert!(is_assistant_thread_event(&dm));
        assert!(!is_assistant_thread_event(&channel_msg));
        assert!(!is_assistant_thread_event(&json!({"type": "block_actions"})));
    }

    #[test]
    fn thread_ts_only_for_assistant_events() {
        let started = json!({"type": "event_callback", "event": {"type": "assistant_thread_started",
            "assistant_thread": {"channel_id": "D1", "thread_ts": "111.1"}}});
        assert_eq!(extract_thread_ts(&started).as_deref(), Some("111.1"));

        let dm = json!({"type": "event_callback", "event": {"type": "message", "channel_type": "im",
            "channel": "D1", "thread_ts": "222.2"}});
        assert_eq!(extract_thread_ts(&dm).as_deref(), Some("222.2"));

        let changed = json!({"type": "event_callback", "event": {"type": "message", "channel_type": "im",
            "channel": "D1", "subtype": "message_changed", "message": {"thread_ts": "333.3"}}});
        assert_eq!(extract_thread_ts(&changed).as_deref(), Some("333.3"));

        let deleted = json!({"type": "event_callback", "event": {"type": "message", "channel_type": "im",
            "channel": "D1", "subtype": "message_deleted", "previous_message": {"thread_ts": "444.4"}}});
        assert_eq!(extract_thread_ts(&deleted).as_deref(), Some("444.4"));

        let channel_msg = json!({"type": "event_callback", "event": {"type": "message",
            "channel_type": "channel", "channel": "C1", "thread_ts": "555.5"}});
        assert_eq!(extract_thread_ts(&channel_msg), None);
    }

    // ── composition ──────────────────────────────────────────────

    #[test]
    fn from_body_is_idempotent() {
        let body = ext_shared_event(json!({
            "type": "message", "channel": "C1", "channel_type": "im", "user": "U_EXT",
            "user_team": "T_EXT", "thread_ts": "1.1",
        }));
        let first = PreAuthorizeContext::from_body(&body);
        let second = PreAuthorizeContext::from_body(&body);
        assert_eq!(first, second);
        assert_eq!(first.channel_id.as_deref(), Some("C1"));
        assert!(first.is_assistant_thread_event);
    }

    #[test]
    fn extractors_are_total_over_odd_shapes() {
        for body in [
            json!(null),
            json!([]),
            json!("text"),
            json!({"team": 42, "user": [], "channel": null, "event": "x"}),
            json!({"type": "event_callback", "is_ext_shared_channel": true, "event": 7}),
        ] {
            let _ = PreAuthorizeContext::from_body(&body);
        }
    }

    // ── capabilities ─────────────────────────────────────────────

    fn authorized(body: &Value) -> (SlackContext, Arc<RecordingApi>) {
        let api = Arc::new(RecordingApi::default());
        let ctx = SlackContext::new(
            PreAuthorizeContext::from_body(body),
            AuthorizeResult::for_bot("B1", "U_BOT", "xoxb-1"),
            api.clone(),
        );
        (ctx, api)
    }

    #[test]
    fn say_requires_channel() {
        let (ctx, _) = authorized(&json!({"command": "/echo"}));
        assert!(ctx.say().is_none());
        let (ctx, _) = authorized(&json!({"command": "/echo", "channel_id": "C1"}));
        assert_eq!(ctx.say().unwrap().channel(), "C1");
    }

    #[test]
    fn respond_requires_response_url() {
        let (ctx, _) = authorized(&json!({"command": "/echo"}));
        assert!(ctx.respond().is_none());
        let (ctx, _) = authorized(&json!({"response_url": "https://hooks.example/r"}));
        assert_eq!(ctx.respond().unwrap().url(), "https://hooks.example/r");
    }

    #[test]
    fn identity_copied_from_authorize_result() {
        let (ctx, _) = authorized(&json!({}));
        assert_eq!(ctx.bot_id, "B1");
        assert_eq!(ctx.bot_user_id, "U_BOT");
        assert_eq!(ctx.primary_token(), Some("xoxb-1"));
    }

    #[test]
    fn function_token_is_primary() {
        let (ctx, _) = authorized(&json!({"event": {"bot_access_token": "xwfp-9"}}));
        assert_eq!(ctx.primary_token(), Some("xwfp-9"));
    }

    #[tokio::test]
    async fn say_posts_to_channel_with_params_merged() {
        let (ctx, api) = authorized(&json!({"channel_id": "C1"}));
        ctx.say().unwrap().send(json!({"text": "hi"})).await.unwrap();
        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "chat.postMessage");
        assert_eq!(calls[0].1, json!({"channel": "C1", "text": "hi"}));
    }

    #[tokio::test]
    async fn say_accepts_bare_text() {
        let (ctx, api) = authorized(&json!({"channel_id": "C1"}));
        ctx.say().unwrap().send("plain").await.unwrap();
        assert_eq!(api.calls()[0].1["text"], "plain");
    }

    #[test]
    fn payload_is_event_for_event_callbacks() {
        let body = json!({"type": "event_callback", "event": {"type": "app_mention"}});
        let (ctx, _) = authorized(&body);
        let req = SlackRequest {
            payload_type: PayloadType::of(&body),
            body: Arc::new(body),
            raw_body: Arc::from(""),
            headers: Arc::new(HeaderMap::new()),
            context: Arc::new(ctx),
        };
        assert_eq!(req.payload()["type"], "app_mention");
    }

    #[test]
    fn context_mut_edits_custom_fields() {
        let (ctx, _) = authorized(&json!({}));
        let mut req = SlackRequest {
            payload_type: PayloadType::Unknown,
            body: Arc::new(json!({})),
            raw_body: Arc::from(""),
            headers: Arc::new(HeaderMap::new()),
            context: Arc::new(ctx),
        };
        let shared = req.clone();
        req.context_mut().custom.insert("k".into(), json!(1));
        assert_eq!(req.context.custom["k"], 1);
        assert!(shared.context.custom.is_empty());
    }
}
