//! Payload category discriminator.
//!
//! Computed once per request from the parsed document; every later stage
//! matches on the resulting [`PayloadType`] instead of sniffing fields again.

use serde_json::Value;
use std::fmt;

/// Top-level category of an inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadType {
    EventCallback,
    SlashCommand,
    GlobalShortcut,
    MessageShortcut,
    BlockActions,
    BlockSuggestion,
    ViewSubmission,
    ViewClosed,
    UrlVerification,
    /// A `type` tag this crate does not route.
    Other(String),
    /// No `type` and no `command`.
    Unknown,
}

impl PayloadType {
    pub fn of(body: &Value) -> Self {
        match body.get("type").and_then(Value::as_str) {
            Some("event_callback") => Self::EventCallback,
            Some("shortcut") => Self::GlobalShortcut,
            Some("message_action") => Self::MessageShortcut,
            Some("block_actions") => Self::BlockActions,
            Some("block_suggestion") => Self::BlockSuggestion,
            Some("view_submission") => Self::ViewSubmission,
            Some("view_closed") => Self::ViewClosed,
            Some("url_verification") => Self::UrlVerification,
            Some(other) => Self::Other(other.to_string()),
            None if body.get("command").is_some() => Self::SlashCommand,
            None => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::EventCallback => "event_callback",
            Self::SlashCommand => "slash_command",
            Self::GlobalShortcut => "shortcut",
            Self::MessageShortcut => "message_action",
            Self::BlockActions => "block_actions",
            Self::BlockSuggestion => "block_suggestion",
            Self::ViewSubmission => "view_submission",
            Self::ViewClosed => "view_closed",
            Self::UrlVerification => "url_verification",
            Self::Other(t) => t,
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `event.type` of an event callback.
pub fn event_type(body: &Value) -> Option<&str> {
    body.pointer("/event/type").and_then(Value::as_str)
}

/// Message subtypes that represent a message actually posted to a channel.
pub const POSTED_MESSAGE_SUBTYPES: [&str; 3] = ["bot_message", "file_share", "thread_broadcast"];

/// True when a `message` event carries a newly posted message rather than an
/// edit, deletion, join notice or similar.
pub fn is_posted_message_event(event: &Value) -> bool {
    match event.get("subtype").and_then(Value::as_str) {
        None => event.get("subtype").is_none_or(Value::is_null),
        Some(subtype) => POSTED_MESSAGE_SUBTYPES.contains(&subtype),
    }
}
