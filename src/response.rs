//! Listener return values and their normalization into wire responses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const CONTENT_TYPE_PLAIN: &str = "text/plain";
pub const CONTENT_TYPE_TEXT: &str = "text/plain;charset=utf-8";
pub const CONTENT_TYPE_JSON: &str = "application/json;charset=utf-8";

/// What an `ack` listener (or a short-circuiting middleware) returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AckResponse {
    /// Nothing to say; acknowledged with an empty 200.
    #[default]
    Empty,
    Text(String),
    /// A message, view, or options object, or an explicit
    /// `{status, contentType, body}` envelope.
    Json(Value),
    Envelope(SlackResponse),
}

impl AckResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn json(value: Value) -> Self {
        Self::Json(value)
    }

    pub fn status(status: u16) -> Self {
        Self::Envelope(SlackResponse {
            status: Some(status),
            ..SlackResponse::default()
        })
    }
}

/// Explicit response envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlackResponse {
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub body: Option<ResponseBody>,
}

impl SlackResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.body = Some(ResponseBody::Text(text.into()));
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(ResponseBody::Json(body));
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Text(String),
    Json(Value),
}

/// Canonical response handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl CompleteResponse {
    pub fn new(status: u16, content_type: &str, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body: body.into(),
        }
    }

    /// Plain-text response used for protocol outcomes (401, 404).
    pub fn plain(status: u16, body: &str) -> Self {
        Self::new(status, CONTENT_TYPE_TEXT, body)
    }
}

// ── Normalizer ────────────────────────────────────────────────────────────────

const MESSAGE_KEYS: [&str; 2] = ["text", "blocks"];
const VIEW_KEYS: [&str; 1] = ["response_action"];
const OPTIONS_KEYS: [&str; 2] = ["options", "option_groups"];

fn has_any(obj: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter().any(|k| obj.contains_key(*k))
}

/// Convert a listener's return value into status, content type and body.
pub fn normalize(ack: AckResponse) -> CompleteResponse {
    match ack {
        AckResponse::Empty => CompleteResponse::new(200, CONTENT_TYPE_PLAIN, ""),
        AckResponse::Text(text) => CompleteResponse::new(200, CONTENT_TYPE_TEXT, text),
        AckResponse::Envelope(envelope) => finish(envelope),
        AckResponse::Json(Value::Null) => normalize(AckResponse::Empty),
        AckResponse::Json(Value::String(text)) => normalize(AckResponse::Text(text)),
        AckResponse::Json(Value::Object(obj)) => {
            if has_any(&obj, &MESSAGE_KEYS) || has_any(&obj, &VIEW_KEYS) || has_any(&obj, &OPTIONS_KEYS) {
                finish(SlackResponse::new(200).with_json(Value::Object(obj)))
            } else {
                finish(envelope_from_object(obj))
            }
        }
        AckResponse::Json(other) => finish(SlackResponse::new(200).with_json(other)),
    }
}

/// Read `{status, contentType, body}` out of an untyped object.
fn envelope_from_object(mut obj: Map<String, Value>) -> SlackResponse {
    let status = obj
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok());
    let content_type = obj
        .get("contentType")
        .or_else(|| obj.get("content_type"))
        .and_then(Value::as_str)
        .map(String::from);
    let body = match obj.remove("body") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(ResponseBody::Text(s)),
        Some(structured) => Some(ResponseBody::Json(structured)),
    };
    SlackResponse {
        status,
        content_type,
        body,
    }
}

fn finish(envelope: SlackResponse) -> CompleteResponse {
    let status = envelope.status.filter(|s| *s != 0).unwrap_or(200);
    match envelope.body {
        Some(ResponseBody::Json(body)) => {
            CompleteResponse::new(status, CONTENT_TYPE_JSON, body.to_string())
        }
        Some(ResponseBody::Text(text)) => CompleteResponse {
            status,
            content_type: envelope
                .content_type
                .unwrap_or_else(|| CONTENT_TYPE_TEXT.to_string()),
            body: text,
        },
        None => CompleteResponse {
            status,
            content_type: envelope
                .content_type
                .unwrap_or_else(|| CONTENT_TYPE_TEXT.to_string()),
            body: String::new(),
        },
    }
}

// ── Typed bodies ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Ephemeral,
    InChannel,
}

/// Message posted in reply to a slash command or interaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<ResponseType>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

impl MessageResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn ephemeral(mut self) -> Self {
        self.response_type = Some(ResponseType::Ephemeral);
        self
    }

    pub fn in_channel(mut self) -> Self {
        self.response_type = Some(ResponseType::InChannel);
        self
    }

    pub fn with_blocks(mut self, blocks: Vec<Value>) -> Self {
        self.blocks = Some(blocks);
        self
    }
}

/// `response_action` answers to a view submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response_action", rename_all = "snake_case")]
pub enum ViewResponse {
    Update { view: Value },
    Push { view: Value },
    Clear,
    Errors { errors: HashMap<String, String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackOption {
    pub text: Value,
    pub value: String,
}

impl SlackOption {
    pub fn plain_text(label: &str, value: impl Into<String>) -> Self {
        Self {
            text: serde_json::json!({"type": "plain_text", "text": label}),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionGroup {
    pub label: Value,
    pub options: Vec<SlackOption>,
}

/// Answer to a `block_suggestion` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionsResponse {
    Options { options: Vec<SlackOption> },
    OptionGroups { option_groups: Vec<OptionGroup> },
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

impl From<()> for AckResponse {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

impl From<&str> for AckResponse {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for AckResponse {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Value> for AckResponse {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<SlackResponse> for AckResponse {
    fn from(envelope: SlackResponse) -> Self {
        Self::Envelope(envelope)
    }
}

impl From<MessageResponse> for AckResponse {
    fn from(message: MessageResponse) -> Self {
        Self::Json(to_json(&message))
    }
}

impl From<ViewResponse> for AckResponse {
    fn from(view: ViewResponse) -> Self {
        Self::Json(to_json(&view))
    }
}

impl From<OptionsResponse> for AckResponse {
    fn from(options: OptionsResponse) -> Self {
        Self::Json(to_json(&options))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
