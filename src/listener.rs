//! Listener bindings and the per-category registry.
//!
//! Each payload category keeps its own ordered list of `(matcher, listener)`
//! records. Registration order is priority: the first record whose matcher
//! accepts the document wins.

use crate::context::{is_assistant_thread_event, SlackRequest};
use crate::payload::{is_posted_message_event, PayloadType};
use crate::response::AckResponse;
use futures_util::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

pub type AckFuture = BoxFuture<'static, anyhow::Result<AckResponse>>;
pub type LazyFuture = BoxFuture<'static, anyhow::Result<()>>;
pub type AckFn = Arc<dyn Fn(SlackRequest) -> AckFuture + Send + Sync>;
pub type LazyFn = Arc<dyn Fn(SlackRequest) -> LazyFuture + Send + Sync>;

pub(crate) fn boxed_ack<F, Fut, R>(f: F) -> AckFn
where
    F: Fn(SlackRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Into<AckResponse>,
{
    Arc::new(move |req| {
        let fut = f(req);
        Box::pin(async move { fut.await.map(Into::into) })
    })
}

pub(crate) fn boxed_lazy<F, Fut>(f: F) -> LazyFn
where
    F: Fn(SlackRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// `ack` builds the response; the optional `lazy` phase runs in the background.
#[derive(Clone)]
pub struct Listener {
    pub(crate) ack: AckFn,
    pub(crate) lazy: Option<LazyFn>,
}

impl Listener {
    pub fn ack<F, Fut, R>(f: F) -> Self
    where
        F: Fn(SlackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<AckResponse>,
    {
        Self {
            ack: boxed_ack(f),
            lazy: None,
        }
    }

    /// Acknowledge with an empty 200 and do all work in `lazy`.
    pub fn lazy_only<F, Fut>(f: F) -> Self
    where
        F: Fn(SlackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::ack(|_| async { Ok(()) }).with_lazy(f)
    }

    pub fn with_lazy<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SlackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.lazy = Some(boxed_lazy(f));
        self
    }

    pub fn has_lazy(&self) -> bool {
        self.lazy.is_some()
    }
}

/// Block suggestion listener. Options must be returned synchronously, so
/// there is no lazy phase.
#[derive(Clone)]
pub struct OptionsListener {
    pub(crate) ack: AckFn,
}

impl OptionsListener {
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn(SlackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<AckResponse>,
    {
        Self { ack: boxed_ack(f) }
    }
}

// ── Patterns ──────────────────────────────────────────────────────────────────

/// Exact string or regular expression.
#[derive(Debug, Clone)]
pub enum Pattern {
    Exact(String),
    Regex(Regex),
}

impl Pattern {
    /// Equality for strings, search for regexes.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(s) => s == value,
            Self::Regex(re) => re.is_match(value),
        }
    }

    /// Substring for strings, search for regexes.
    pub fn found_in(&self, value: &str) -> bool {
        match self {
            Self::Exact(s) => value.contains(s.as_str()),
            Self::Regex(re) => re.is_match(value),
        }
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Self::Exact(s.to_string())
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Self::Exact(s)
    }
}

impl From<Regex> for Pattern {
    fn from(re: Regex) -> Self {
        Self::Regex(re)
    }
}

/// Block action constraint, applied to the first element of `actions`.
#[derive(Debug, Clone)]
pub enum ActionConstraint {
    ActionId(Pattern),
    Typed {
        action_type: String,
        action_id: String,
        block_id: Option<String>,
    },
}

impl ActionConstraint {
    /// Require the element type and action id, e.g. `("button", "approve")`.
    pub fn typed(action_type: &str, action_id: &str) -> Self {
        Self::Typed {
            action_type: action_type.to_string(),
            action_id: action_id.to_string(),
            block_id: None,
        }
    }

    pub fn in_block(self, block: &str) -> Self {
        match self {
            Self::Typed {
                action_type,
                action_id,
                ..
            } => Self::Typed {
                action_type,
                action_id,
                block_id: Some(block.to_string()),
            },
            other => other,
        }
    }

    fn matches(&self, action: &Value) -> bool {
        let field = |key: &str| action.get(key).and_then(Value::as_str);
        let Some(action_id) = field("action_id") else {
            return false;
        };
        match self {
            Self::ActionId(pattern) => pattern.matches(action_id),
            Self::Typed {
                action_type,
                action_id: want_id,
                block_id,
            } => {
                field("type") == Some(action_type.as_str())
                    && action_id == want_id
                    && block_id
                        .as_deref()
                        .is_none_or(|b| field("block_id") == Some(b))
            }
        }
    }
}

macro_rules! id_pattern_from {
    ($target:ty) => {
        impl From<&str> for $target {
            fn from(s: &str) -> Self {
                Self::ActionId(s.into())
            }
        }

        impl From<String> for $target {
            fn from(s: String) -> Self {
                Self::ActionId(s.into())
            }
        }

        impl From<Regex> for $target {
            fn from(re: Regex) -> Self {
                Self::ActionId(re.into())
            }
        }
    };
}

id_pattern_from!(ActionConstraint);

/// Block suggestion constraint on `action_id`, optionally narrowed by `block_id`.
#[derive(Debug, Clone)]
pub enum OptionsConstraint {
    ActionId(Pattern),
    Ids {
        action_id: String,
        block_id: Option<String>,
    },
}

impl OptionsConstraint {
    pub fn ids(action_id: &str, block_id: Option<&str>) -> Self {
        Self::Ids {
            action_id: action_id.to_string(),
            block_id: block_id.map(String::from),
        }
    }

    fn matches(&self, body: &Value) -> bool {
        let field = |key: &str| body.get(key).and_then(Value::as_str);
        let Some(action_id) = field("action_id") else {
            return false;
        };
        match self {
            Self::ActionId(pattern) => pattern.matches(action_id),
            Self::Ids {
                action_id: want_id,
                block_id,
            } => {
                action_id == want_id
                    && block_id
                        .as_deref()
                        .is_none_or(|b| field("block_id") == Some(b))
            }
        }
    }
}

id_pattern_from!(OptionsConstraint);

/// Matcher for event callbacks.
#[derive(Debug, Clone)]
pub enum EventMatcher {
    /// `event.type` equality.
    Type(String),
    /// Posted `message` events, optionally filtered by text.
    Message(Option<Pattern>),
    /// `function_executed` events, optionally filtered by callback id.
    FunctionExecuted(Option<Pattern>),
    /// `event.type` equality inside an assistant thread.
    AssistantThread(String),
}

impl EventMatcher {
    fn matches(&self, body: &Value) -> bool {
        let Some(event) = body.get("event") else {
            return false;
        };
        let event_type = event.get("type").and_then(Value::as_str);
        match self {
            Self::Type(t) => event_type == Some(t.as_str()),
            Self::Message(pattern) => {
                event_type == Some("message")
                    && is_posted_message_event(event)
                    && pattern.as_ref().is_none_or(|p| {
                        event
                            .get("text")
                            .and_then(Value::as_str)
                            .is_some_and(|text| p.found_in(text))
                    })
            }
            Self::FunctionExecuted(pattern) => {
                let callback_id = event.pointer("/function/callback_id").and_then(Value::as_str);
                event_type == Some("function_executed")
                    && callback_id.is_some()
                    && pattern
                        .as_ref()
                        .is_none_or(|p| callback_id.is_some_and(|id| p.found_in(id)))
            }
            Self::AssistantThread(t) => {
                event_type == Some(t.as_str()) && is_assistant_thread_event(body)
            }
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// The listener chosen for a request.
pub enum Matched<'a> {
    Listener(&'a Listener),
    Options(&'a OptionsListener),
}

/// Ordered listener records, one list per payload category.
#[derive(Default)]
pub struct Registry {
    pub(crate) events: Vec<(EventMatcher, Listener)>,
    pub(crate) commands: Vec<(Pattern, Listener)>,
    pub(crate) global_shortcuts: Vec<(Pattern, Listener)>,
    pub(crate) message_shortcuts: Vec<(Pattern, Listener)>,
    pub(crate) block_actions: Vec<(ActionConstraint, Listener)>,
    pub(crate) block_suggestions: Vec<(OptionsConstraint, OptionsListener)>,
    pub(crate) view_submissions: Vec<(Pattern, Listener)>,
    pub(crate) view_closed: Vec<(Pattern, Listener)>,
}

fn first_by_field<'a>(
    records: &'a [(Pattern, Listener)],
    value: Option<&str>,
) -> Option<&'a Listener> {
    let value = value?;
    records
        .iter()
        .find(|(pattern, _)| pattern.matches(value))
        .map(|(_, listener)| listener)
}

impl Registry {
    /// First listener registered for this document, if any.
    pub fn find(&self, payload_type: &PayloadType, body: &Value) -> Option<Matched<'_>> {
        let str_at = |ptr: &str| body.pointer(ptr).and_then(Value::as_str);
        let listener = match payload_type {
            PayloadType::EventCallback => self
                .events
                .iter()
                .find(|(m, _)| m.matches(body))
                .map(|(_, l)| l),
            PayloadType::SlashCommand => first_by_field(&self.commands, str_at("/command")),
            PayloadType::GlobalShortcut => {
                first_by_field(&self.global_shortcuts, str_at("/callback_id"))
            }
            PayloadType::MessageShortcut => {
                first_by_field(&self.message_shortcuts, str_at("/callback_id"))
            }
            PayloadType::BlockActions => {
                let action = body.pointer("/actions/0")?;
                self.block_actions
                    .iter()
                    .find(|(c, _)| c.matches(action))
                    .map(|(_, l)| l)
            }
            PayloadType::BlockSuggestion => {
                return self
                    .block_suggestions
                    .iter()
                    .find(|(c, _)| c.matches(body))
                    .map(|(_, l)| Matched::Options(l));
            }
            PayloadType::ViewSubmission => {
                first_by_field(&self.view_submissions, str_at("/view/callback_id"))
            }
            PayloadType::ViewClosed => first_by_field(&self.view_closed, str_at("/view/callback_id")),
            PayloadType::UrlVerification | PayloadType::Other(_) | PayloadType::Unknown => None,
        };
        listener.map(Matched::Listener)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
