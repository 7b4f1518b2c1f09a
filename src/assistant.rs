//! Assistant thread support: a listener bundle for AI assistant threads plus
//! the per-thread context store.

use crate::client::SlackApi;
use crate::context::SlackRequest;
use crate::error::ApiError;
use crate::listener::{boxed_lazy, EventMatcher, LazyFn, Listener};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Hard cap on tracked threads in the in-memory store.
const MAX_ENTRIES: usize = 10_000;

pub const DEFAULT_GREETING: &str = ":wave: Hi, how can I help you today?";
const DEFAULT_PROMPTS_TITLE: &str = "New chat";
const DEFAULT_PROMPT: &str = "What does SLACK stand for?";

/// Where the user opened the assistant from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantThreadContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise_id: Option<String>,
}

impl AssistantThreadContext {
    pub fn is_empty(&self) -> bool {
        self.channel_id.is_none() && self.team_id.is_none() && self.enterprise_id.is_none()
    }
}

/// Context carried by `assistant_thread_started` and
/// `assistant_thread_context_changed` events.
pub fn event_thread_context(body: &Value) -> Option<AssistantThreadContext> {
    body.pointer("/event/assistant_thread/context")
        .and_then(|v| serde_json::from_value::<AssistantThreadContext>(v.clone()).ok())
        .filter(|ctx| !ctx.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub channel_id: String,
    pub thread_ts: String,
}

impl ThreadKey {
    pub fn new(channel_id: impl Into<String>, thread_ts: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            thread_ts: thread_ts.into(),
        }
    }
}

// ── Context store ─────────────────────────────────────────────────────────────

#[async_trait]
pub trait AssistantThreadContextStore: Send + Sync {
    async fn save(&self, key: &ThreadKey, context: AssistantThreadContext) -> anyhow::Result<()>;
    async fn find(&self, key: &ThreadKey) -> anyhow::Result<Option<AssistantThreadContext>>;
}

pub(crate) const CONTEXT_EVENT_TYPE: &str = "assistant_thread_context";

/// Keeps the context in Slack: as the `metadata` of the app's first reply in
/// the thread. Nothing is saved until the app has replied once.
pub struct MessageMetadataThreadContextStore {
    client: Arc<dyn SlackApi>,
    bot_user_id: String,
}

/// The app's first plain reply in a thread.
struct FirstReply {
    ts: String,
    text: Value,
    blocks: Option<Value>,
    metadata: Option<Value>,
}

impl MessageMetadataThreadContextStore {
    pub fn new(client: Arc<dyn SlackApi>, bot_user_id: impl Into<String>) -> Self {
        Self {
            client,
            bot_user_id: bot_user_id.into(),
        }
    }

    async fn first_reply(&self, key: &ThreadKey) -> Option<FirstReply> {
        let params = json!({
            "channel": key.channel_id,
            "ts": key.thread_ts,
            "oldest": key.thread_ts,
            "include_all_metadata": true,
            "limit": 4,
        });
        let response = match self.client.call("conversations.replies", params).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Slack: conversations.replies failed: {e}");
                return None;
            }
        };
        response
            .get("messages")
            .and_then(Value::as_array)?
            .iter()
            .find(|m| {
                m.get("subtype").is_none()
                    && m.get("user").and_then(Value::as_str) == Some(self.bot_user_id.as_str())
            })
            .and_then(|m| {
                Some(FirstReply {
                    ts: m.get("ts").and_then(Value::as_str)?.to_string(),
                    text: m.get("text").cloned().unwrap_or(Value::Null),
                    blocks: m.get("blocks").cloned(),
                    metadata: m.get("metadata").cloned(),
                })
            })
    }
}

#[async_trait]
impl AssistantThreadContextStore for MessageMetadataThreadContextStore {
    async fn save(&self, key: &ThreadKey, context: AssistantThreadContext) -> anyhow::Result<()> {
        let Some(reply) = self.first_reply(key).await else {
            tracing::debug!(
                channel = %key.channel_id,
                thread_ts = %key.thread_ts,
                "Slack: no assistant reply to attach thread context to"
            );
            return Ok(());
        };
        let mut params = json!({
            "channel": key.channel_id,
            "ts": reply.ts,
            "text": reply.text,
            "metadata": {
                "event_type": CONTEXT_EVENT_TYPE,
                "event_payload": context,
            },
        });
        if let (Some(blocks), Some(map)) = (reply.blocks, params.as_object_mut()) {
            map.insert("blocks".into(), blocks);
        }
        self.client.call("chat.update", params).await?;
        Ok(())
    }

    async fn find(&self, key: &ThreadKey) -> anyhow::Result<Option<AssistantThreadContext>> {
        let payload = self
            .first_reply(key)
            .await
            .and_then(|reply| reply.metadata)
            .and_then(|metadata| metadata.get("event_payload").cloned());
        match payload {
            Some(payload) => Ok(Some(serde_json::from_value(payload)?)),
            None => Ok(None),
        }
    }
}

/// Process-local store. Entries persist until restart; new threads are
/// dropped once [`MAX_ENTRIES`] is reached.
#[derive(Default)]
pub struct InMemoryThreadContextStore {
    contexts: RwLock<HashMap<ThreadKey, AssistantThreadContext>>,
}

impl InMemoryThreadContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AssistantThreadContextStore for InMemoryThreadContextStore {
    async fn save(&self, key: &ThreadKey, context: AssistantThreadContext) -> anyhow::Result<()> {
        let mut map = self.contexts.write();
        if map.len() >= MAX_ENTRIES && !map.contains_key(key) {
            tracing::warn!(
                capacity = MAX_ENTRIES,
                "Slack: assistant context store at capacity; dropping context for new thread"
            );
            return Ok(());
        }
        map.insert(key.clone(), context);
        Ok(())
    }

    async fn find(&self, key: &ThreadKey) -> anyhow::Result<Option<AssistantThreadContext>> {
        Ok(self.contexts.read().get(key).cloned())
    }
}

// ── Per-request utilities ─────────────────────────────────────────────────────

/// Suggested prompt shown under the assistant composer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestedPrompt {
    pub title: String,
    pub message: String,
}

impl From<&str> for SuggestedPrompt {
    fn from(prompt: &str) -> Self {
        Self {
            title: prompt.to_string(),
            message: prompt.to_string(),
        }
    }
}

/// Assistant thread helpers bound to one channel and thread.
#[derive(Clone)]
pub struct AssistantUtilities {
    client: Arc<dyn SlackApi>,
    key: ThreadKey,
    store: Arc<dyn AssistantThreadContextStore>,
    thread_context: Option<AssistantThreadContext>,
}

impl AssistantUtilities {
    /// Look up the thread context: the store first, then the event itself.
    pub(crate) async fn load(
        client: Arc<dyn SlackApi>,
        key: ThreadKey,
        store: Arc<dyn AssistantThreadContextStore>,
        body: &Value,
    ) -> Self {
        let stored = match store.find(&key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("Slack: failed to load assistant thread context: {e:#}");
                None
            }
        };
        let thread_context = stored.or_else(|| event_thread_context(body));
        Self {
            client,
            key,
            store,
            thread_context,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.key.channel_id
    }

    pub fn thread_ts(&self) -> &str {
        &self.key.thread_ts
    }

    pub fn thread_context(&self) -> Option<&AssistantThreadContext> {
        self.thread_context.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn AssistantThreadContextStore> {
        &self.store
    }

    fn thread_params(&self, extra: Value) -> Value {
        let mut params = json!({
            "channel_id": self.key.channel_id,
            "thread_ts": self.key.thread_ts,
        });
        if let (Some(map), Value::Object(extra)) = (params.as_object_mut(), extra) {
            map.extend(extra);
        }
        params
    }

    pub async fn set_status(&self, status: &str) -> Result<Value, ApiError> {
        self.client
            .call(
                "assistant.threads.setStatus",
                self.thread_params(json!({ "status": status })),
            )
            .await
    }

    pub async fn set_title(&self, title: &str) -> Result<Value, ApiError> {
        self.client
            .call(
                "assistant.threads.setTitle",
                self.thread_params(json!({ "title": title })),
            )
            .await
    }

    pub async fn set_suggested_prompts(
        &self,
        title: Option<&str>,
        prompts: Vec<SuggestedPrompt>,
    ) -> Result<Value, ApiError> {
        let mut extra = json!({ "prompts": prompts });
        if let (Some(title), Some(map)) = (title, extra.as_object_mut()) {
            map.insert("title".into(), Value::String(title.to_string()));
        }
        self.client
            .call("assistant.threads.setSuggestedPrompts", self.thread_params(extra))
            .await
    }

    pub async fn save_thread_context(&self, context: AssistantThreadContext) -> anyhow::Result<()> {
        self.store.save(&self.key, context).await
    }
}

// ── Listener bundle ───────────────────────────────────────────────────────────

/// Handlers for assistant thread events. Unset handlers fall back to the
/// defaults: greet on thread start, persist context on change, ignore
/// messages.
#[derive(Default)]
pub struct Assistant {
    thread_started: Option<LazyFn>,
    thread_context_changed: Option<LazyFn>,
    user_message: Option<LazyFn>,
    bot_message: Option<LazyFn>,
    store: Option<Arc<dyn AssistantThreadContextStore>>,
}

pub(crate) struct AssistantRegistration {
    pub listeners: Vec<(EventMatcher, Listener)>,
    pub store: Option<Arc<dyn AssistantThreadContextStore>>,
    pub handles_bot_messages: bool,
}

impl Assistant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_started<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SlackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.thread_started = Some(boxed_lazy(f));
        self
    }

    pub fn thread_context_changed<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SlackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.thread_context_changed = Some(boxed_lazy(f));
        self
    }

    /// Messages from people in the thread (no subtype, or `file_share`).
    pub fn user_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SlackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.user_message = Some(boxed_lazy(f));
        self
    }

    /// The app's own replies in the thread.
    pub fn bot_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SlackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.bot_message = Some(boxed_lazy(f));
        self
    }

    pub fn thread_context_store(mut self, store: Arc<dyn AssistantThreadContextStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub(crate) fn into_registration(self) -> AssistantRegistration {
        let handles_bot_messages = self.bot_message.is_some();
        let started = self.thread_started.unwrap_or_else(|| boxed_lazy(greet));
        let changed = self
            .thread_context_changed
            .unwrap_or_else(|| boxed_lazy(save_changed_context));
        let user_message = self.user_message;
        let bot_message = self.bot_message;

        let message = Listener::lazy_only(move |req: SlackRequest| {
            let handler = route_message(&req, user_message.as_ref(), bot_message.as_ref());
            let fut = handler.map(|h| h(req));
            async move {
                match fut {
                    Some(fut) => fut.await,
                    None => Ok(()),
                }
            }
        });

        AssistantRegistration {
            listeners: vec![
                (
                    EventMatcher::AssistantThread("assistant_thread_started".into()),
                    Listener::lazy_only(move |req| started(req)),
                ),
                (
                    EventMatcher::AssistantThread("assistant_thread_context_changed".into()),
                    Listener::lazy_only(move |req| changed(req)),
                ),
                (EventMatcher::AssistantThread("message".into()), message),
            ],
            store: self.store,
            handles_bot_messages,
        }
    }
}

fn route_message<'a>(
    req: &SlackRequest,
    user_message: Option<&'a LazyFn>,
    bot_message: Option<&'a LazyFn>,
) -> Option<&'a LazyFn> {
    let event = req.payload();
    let subtype = event.get("subtype").and_then(Value::as_str);
    let from_bot = event.get("user").and_then(Value::as_str) == Some(req.context.bot_user_id.as_str());
    match subtype {
        None if from_bot => bot_message,
        None | Some("file_share") => user_message,
        Some(other) => {
            tracing::debug!(subtype = other, "Slack: assistant ignoring message subtype");
            None
        }
    }
}

async fn greet(req: SlackRequest) -> anyhow::Result<()> {
    if let Some(say) = req.context.say() {
        say.send(DEFAULT_GREETING).await?;
    }
    if let Some(assistant) = req.context.assistant() {
        assistant
            .set_suggested_prompts(Some(DEFAULT_PROMPTS_TITLE), vec![DEFAULT_PROMPT.into()])
            .await?;
    }
    Ok(())
}

async fn save_changed_context(req: SlackRequest) -> anyhow::Result<()> {
    if let (Some(assistant), Some(context)) =
        (req.context.assistant(), event_thread_context(&req.body))
    {
        assistant.save_thread_context(context).await?;
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
