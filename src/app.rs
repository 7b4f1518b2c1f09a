//! The dispatcher: one inbound request in, one complete response out.
//!
//! Order of work for every request:
//! path check, ssl_check probe, signature check, parse, context, pre-authorize
//! middleware, authorize, post-authorize middleware, listener match, ack/lazy
//! execution, normalization.

use crate::assistant::{
    Assistant, AssistantThreadContextStore, AssistantUtilities, MessageMetadataThreadContextStore,
    ThreadKey,
};
use crate::authorize::{
    should_skip_authorize, Authorize, AuthorizeErrorHandler, AuthorizeResult, SingleTeamAuthorize,
};
use crate::client::{ApiClientFactory, HttpClientFactory, DEFAULT_API_BASE_URL};
use crate::config::AppConfig;
use crate::context::{PreAuthorizeContext, PreAuthorizeRequest, SlackContext, SlackRequest};
use crate::error::{ConfigError, DispatchError};
use crate::executor::{execute, execute_options, LazyPolicy, LazyScheduler, TaskTrackerScheduler};
use crate::listener::{
    ActionConstraint, EventMatcher, Listener, Matched, OptionsConstraint, OptionsListener, Pattern,
    Registry,
};
use crate::middleware::{IgnoringSelfEvents, Middleware, PreAuthorizeMiddleware, UrlVerification};
use crate::payload::PayloadType;
use crate::request::{
    is_ssl_check, parse_request_body, verify_slack_request, InboundRequest, Transport,
    HEADER_RETRY_NUM, HEADER_RETRY_REASON,
};
use crate::response::{normalize, AckResponse, CompleteResponse};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

// ── Builder ───────────────────────────────────────────────────────────────────

/// Collects the pluggable parts of a [`SlackApp`]. Anything left unset gets the
/// default: single-workspace authorize from `bot_token`, reqwest Web API
/// client, tokio task tracker for lazy work, assistant context kept in the
/// metadata of the app's first reply in each thread.
pub struct SlackAppBuilder {
    config: AppConfig,
    authorize: Option<Arc<dyn Authorize>>,
    authorize_error_handler: Option<Arc<dyn AuthorizeErrorHandler>>,
    client_factory: Option<Arc<dyn ApiClientFactory>>,
    scheduler: Option<Arc<dyn LazyScheduler>>,
    thread_context_store: Option<Arc<dyn AssistantThreadContextStore>>,
}

impl SlackAppBuilder {
    pub fn authorize(mut self, authorize: impl Authorize + 'static) -> Self {
        self.authorize = Some(Arc::new(authorize));
        self
    }

    pub fn authorize_error_handler(mut self, handler: impl AuthorizeErrorHandler + 'static) -> Self {
        self.authorize_error_handler = Some(Arc::new(handler));
        self
    }

    pub fn client_factory(mut self, factory: Arc<dyn ApiClientFactory>) -> Self {
        self.client_factory = Some(factory);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn LazyScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn thread_context_store(mut self, store: Arc<dyn AssistantThreadContextStore>) -> Self {
        self.thread_context_store = Some(store);
        self
    }

    pub fn build(self) -> Result<SlackApp, ConfigError> {
        self.config.validate(self.authorize.is_some())?;
        let config = self.config;

        let client_factory = self.client_factory.unwrap_or_else(|| {
            Arc::new(HttpClientFactory::new(
                config
                    .api_base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            ))
        });
        let authorize: Arc<dyn Authorize> = match (self.authorize, config.bot_token.as_deref()) {
            (Some(custom), _) => custom,
            (None, Some(token)) => Arc::new(SingleTeamAuthorize::new(
                token,
                client_factory.client(Some(token)),
            )),
            (None, None) => return Err(ConfigError::MissingAuthorization),
        };
        let self_events = config
            .ignore_self_events
            .then(|| IgnoringSelfEvents::new(config.self_event_keep_types.clone()));

        Ok(SlackApp {
            lazy_policy: LazyPolicy::from_lazy_after_ack(config.start_lazy_listener_after_ack),
            config,
            authorize,
            authorize_error_handler: self.authorize_error_handler,
            client_factory,
            scheduler: self
                .scheduler
                .unwrap_or_else(|| Arc::new(TaskTrackerScheduler::new())),
            thread_context_store: self.thread_context_store,
            pre_authorize: vec![Arc::new(UrlVerification)],
            self_events,
            post_authorize: Vec::new(),
            registry: Registry::default(),
        })
    }
}

// ── App ───────────────────────────────────────────────────────────────────────

/// A Slack app: registered listeners and middleware plus the dispatch loop.
///
/// Register with `&mut self`, then share as `Arc<SlackApp>`.
pub struct SlackApp {
    config: AppConfig,
    lazy_policy: LazyPolicy,
    authorize: Arc<dyn Authorize>,
    authorize_error_handler: Option<Arc<dyn AuthorizeErrorHandler>>,
    client_factory: Arc<dyn ApiClientFactory>,
    scheduler: Arc<dyn LazyScheduler>,
    /// `None` binds a [`MessageMetadataThreadContextStore`] to each request.
    thread_context_store: Option<Arc<dyn AssistantThreadContextStore>>,
    pre_authorize: Vec<Arc<dyn PreAuthorizeMiddleware>>,
    self_events: Option<IgnoringSelfEvents>,
    post_authorize: Vec<Arc<dyn Middleware>>,
    registry: Registry,
}

impl SlackApp {
    pub fn builder(config: AppConfig) -> SlackAppBuilder {
        SlackAppBuilder {
            config,
            authorize: None,
            authorize_error_handler: None,
            client_factory: None,
            scheduler: None,
            thread_context_store: None,
        }
    }

    /// Build with every default.
    pub fn new(config: AppConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn client_factory(&self) -> &Arc<dyn ApiClientFactory> {
        &self.client_factory
    }

    /// Wait for outstanding lazy work.
    pub async fn shutdown(&self) {
        self.scheduler.drain().await;
    }

    // ── Middleware registration ──

    pub fn before_authorize(&mut self, middleware: impl PreAuthorizeMiddleware + 'static) -> &mut Self {
        self.pre_authorize.push(Arc::new(middleware));
        self
    }

    pub fn after_authorize(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.post_authorize.push(Arc::new(middleware));
        self
    }

    /// Same as [`SlackApp::after_authorize`].
    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.after_authorize(middleware)
    }

    // ── Listener registration ──

    pub fn command(&mut self, pattern: impl Into<Pattern>, listener: Listener) -> &mut Self {
        self.registry.commands.push((pattern.into(), listener));
        self
    }

    /// Events are acknowledged with an empty 200; all work happens in `lazy`.
    pub fn event<F, Fut>(&mut self, event_type: &str, lazy: F) -> &mut Self
    where
        F: Fn(SlackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registry.events.push((
            EventMatcher::Type(event_type.to_string()),
            Listener::lazy_only(lazy),
        ));
        self
    }

    /// Posted messages whose text contains the string or matches the regex.
    pub fn message<F, Fut>(&mut self, pattern: impl Into<Pattern>, lazy: F) -> &mut Self
    where
        F: Fn(SlackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registry.events.push((
            EventMatcher::Message(Some(pattern.into())),
            Listener::lazy_only(lazy),
        ));
        self
    }

    pub fn any_message<F, Fut>(&mut self, lazy: F) -> &mut Self
    where
        F: Fn(SlackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registry
            .events
            .push((EventMatcher::Message(None), Listener::lazy_only(lazy)));
        self
    }

    /// `function_executed` events whose callback id contains the string or
    /// matches the regex.
    pub fn function<F, Fut>(&mut self, callback_id: impl Into<Pattern>, lazy: F) -> &mut Self
    where
        F: Fn(SlackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registry.events.push((
            EventMatcher::FunctionExecuted(Some(callback_id.into())),
            Listener::lazy_only(lazy),
        ));
        self
    }

    /// Register for both global and message shortcuts.
    pub fn shortcut(&mut self, callback_id: impl Into<Pattern>, listener: Listener) -> &mut Self {
        let pattern = callback_id.into();
        self.registry
            .global_shortcuts
            .push((pattern.clone(), listener.clone()));
        self.registry.message_shortcuts.push((pattern, listener));
        self
    }

    pub fn global_shortcut(&mut self, callback_id: impl Into<Pattern>, listener: Listener) -> &mut Self {
        self.registry.global_shortcuts.push((callback_id.into(), listener));
        self
    }

    pub fn message_shortcut(&mut self, callback_id: impl Into<Pattern>, listener: Listener) -> &mut Self {
        self.registry.message_shortcuts.push((callback_id.into(), listener));
        self
    }

    pub fn action(&mut self, constraint: impl Into<ActionConstraint>, listener: Listener) -> &mut Self {
        self.registry.block_actions.push((constraint.into(), listener));
        self
    }

    pub fn options(
        &mut self,
        constraint: impl Into<OptionsConstraint>,
        listener: OptionsListener,
    ) -> &mut Self {
        self.registry
            .block_suggestions
            .push((constraint.into(), listener));
        self
    }

    /// Register for both view submissions and view closes.
    pub fn view(&mut self, callback_id: impl Into<Pattern>, listener: Listener) -> &mut Self {
        let pattern = callback_id.into();
        self.registry
            .view_submissions
            .push((pattern.clone(), listener.clone()));
        self.registry.view_closed.push((pattern, listener));
        self
    }

    pub fn view_submission(&mut self, callback_id: impl Into<Pattern>, listener: Listener) -> &mut Self {
        self.registry.view_submissions.push((callback_id.into(), listener));
        self
    }

    pub fn view_closed(&mut self, callback_id: impl Into<Pattern>, listener: Listener) -> &mut Self {
        self.registry.view_closed.push((callback_id.into(), listener));
        self
    }

    pub fn assistant(&mut self, assistant: Assistant) -> &mut Self {
        let registration = assistant.into_registration();
        self.registry.events.extend(registration.listeners);
        if let Some(store) = registration.store {
            self.thread_context_store = Some(store);
        }
        if registration.handles_bot_messages {
            self.self_events = self
                .self_events
                .take()
                .map(|m| m.pass_assistant_dm_echoes(true));
        }
        self
    }

    // ── Dispatch ──

    /// Handle one request. Protocol outcomes (401, 404, middleware
    /// short-circuits) are `Ok`; parse, authorize, middleware and listener
    /// failures are `Err`.
    pub async fn run(&self, request: InboundRequest) -> Result<CompleteResponse, DispatchError> {
        let span = tracing::info_span!(
            "slack_request",
            request_id = %uuid::Uuid::new_v4(),
            transport = ?request.transport,
        );
        self.dispatch(request).instrument(span).await
    }

    fn signature_ok(&self, request: &InboundRequest) -> bool {
        match self.config.signing_secret.as_deref() {
            Some(secret) => verify_slack_request(
                secret,
                &request.headers,
                &request.raw_body,
                chrono::Utc::now().timestamp(),
            ),
            None => false,
        }
    }

    async fn dispatch(&self, request: InboundRequest) -> Result<CompleteResponse, DispatchError> {
        if request.transport == Transport::Http {
            if let (Some(expected), Some(path)) = (&self.config.events_path, &request.path) {
                if path != expected {
                    return Ok(CompleteResponse::plain(404, "Not found"));
                }
            }
        }
        if is_ssl_check(&request.raw_body) {
            return Ok(CompleteResponse::plain(200, ""));
        }
        if request.transport == Transport::Http && !self.signature_ok(&request) {
            tracing::warn!("Slack: rejecting request with invalid signature");
            return Ok(CompleteResponse::plain(401, "Invalid signature"));
        }

        let body = parse_request_body(&request.headers, &request.raw_body)?;
        let payload_type = PayloadType::of(&body);
        tracing::debug!(%payload_type, body = %request.raw_body, "Slack: received request");

        let mut context = PreAuthorizeContext::from_body(&body);
        context.retry_num = retry_num(&request, &body);
        context.retry_reason = retry_reason(&request, &body);
        let mut pre = PreAuthorizeRequest {
            body: Arc::new(body),
            raw_body: Arc::from(request.raw_body),
            headers: Arc::new(request.headers),
            payload_type,
            context,
        };

        for middleware in &self.pre_authorize {
            if let Some(response) = middleware.handle(&mut pre).await? {
                return Ok(finish(response));
            }
        }

        let authorize_result = if should_skip_authorize(&pre, &self.config.skip_authorize_events) {
            tracing::debug!("Slack: skipping authorize");
            AuthorizeResult::skipped(&pre.context)
        } else {
            match self.authorize.authorize(&pre).await {
                Ok(result) => result,
                Err(error) => {
                    tracing::error!("Slack: {error}");
                    return match &self.authorize_error_handler {
                        Some(handler) => Ok(finish(handler.handle(error, &pre).await?)),
                        None => Err(error.into()),
                    };
                }
            }
        };

        let PreAuthorizeRequest {
            body,
            raw_body,
            headers,
            payload_type,
            context,
        } = pre;
        let primary_token = context
            .function_bot_access_token
            .clone()
            .or_else(|| authorize_result.bot_token.clone());
        let client = self.client_factory.client(primary_token.as_deref());
        let assistant_key = match (&context.channel_id, &context.thread_ts) {
            (Some(channel), Some(ts)) if context.is_assistant_thread_event => {
                Some(ThreadKey::new(channel.clone(), ts.clone()))
            }
            _ => None,
        };
        let mut slack_context = SlackContext::new(context, authorize_result, client.clone());
        if let Some(key) = assistant_key {
            let store: Arc<dyn AssistantThreadContextStore> = match &self.thread_context_store {
                Some(store) => Arc::clone(store),
                None => Arc::new(MessageMetadataThreadContextStore::new(
                    Arc::clone(&client),
                    slack_context.bot_user_id.clone(),
                )),
            };
            let utilities = AssistantUtilities::load(client, key, store, &body).await;
            slack_context = slack_context.with_assistant(utilities);
        }

        let mut req = SlackRequest {
            body,
            raw_body,
            headers,
            payload_type,
            context: Arc::new(slack_context),
        };

        if let Some(self_events) = &self.self_events {
            if let Some(response) = self_events.handle(&mut req).await? {
                return Ok(finish(response));
            }
        }
        for middleware in &self.post_authorize {
            if let Some(response) = middleware.handle(&mut req).await? {
                return Ok(finish(response));
            }
        }

        let ack = match self.registry.find(&req.payload_type, &req.body) {
            Some(Matched::Listener(listener)) => {
                execute(listener, &req, self.lazy_policy, self.scheduler.as_ref()).await?
            }
            Some(Matched::Options(listener)) => execute_options(listener, &req).await?,
            None => {
                tracing::info!(payload_type = %req.payload_type, "Slack: no listener found");
                return Ok(CompleteResponse::plain(404, "No listener found"));
            }
        };
        Ok(finish(ack))
    }
}

fn finish(ack: AckResponse) -> CompleteResponse {
    let response = normalize(ack);
    tracing::debug!(status = response.status, body = %response.body, "Slack: ack");
    response
}

fn as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Header first; over Socket Mode the document's `retry_attempt` also counts.
fn retry_num(request: &InboundRequest, body: &Value) -> Option<u32> {
    request
        .header(HEADER_RETRY_NUM)
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| match request.transport {
            Transport::SocketMode => body.get("retry_attempt").and_then(as_u32),
            Transport::Http => None,
        })
}

fn retry_reason(request: &InboundRequest, body: &Value) -> Option<String> {
    request
        .header(HEADER_RETRY_REASON)
        .map(String::from)
        .or_else(|| {
            body.get("retry_reason")
                .and_then(Value::as_str)
                .map(String::from)
        })
        .filter(|r| !r.is_empty())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorize::authorize_fn;
    use crate::error::AuthorizeError;
    use crate::middleware::{middleware_fn, pre_authorize_fn};
    use crate::request::verify::sign_request;
    use crate::request::{HEADER_SIGNATURE, HEADER_TIMESTAMP};
    use crate::response::{CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT};
    use crate::testing::RecordingFactory;
    use axum::http::{HeaderMap, HeaderValue};
    use parking_lot::Mutex;
    use serde_json::json;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";

    fn config() -> AppConfig {
        AppConfig {
            signing_secret: Some(SECRET.into()),
            bot_token: Some("xoxb-config".into()),
            ..AppConfig::default()
        }
    }

    fn app_with(config: AppConfig, factory: Arc<RecordingFactory>) -> SlackApp {
        SlackApp::builder(config)
            .authorize(authorize_fn(|_ctx: PreAuthorizeContext| async {
                Ok(AuthorizeResult::for_bot("B_SELF", "U_SELF", "xoxb-auth"))
            }))
            .client_factory(factory)
            .build()
            .unwrap()
    }

    fn app() -> SlackApp {
        app_with(config(), Arc::default())
    }

    fn signed(path: &str, content_type: &str, body: &str) -> InboundRequest {
        let ts = chrono::Utc::now().timestamp().to_string();
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_str(content_type).unwrap());
        headers.insert(HEADER_TIMESTAMP, HeaderValue::from_str(&ts).unwrap());
        let signature = sign_request(SECRET, &ts, body).unwrap();
        headers.insert(HEADER_SIGNATURE, HeaderValue::from_str(&signature).unwrap());
        InboundRequest::http(path, headers, body)
    }

    fn signed_json(body: Value) -> InboundRequest {
        signed("/slack/events", "application/json", &body.to_string())
    }

    #[test]
    fn build_requires_authorization_source() {
        let cfg = AppConfig {
            bot_token: None,
            ..config()
        };
        assert!(matches!(
            SlackApp::new(cfg),
            Err(ConfigError::MissingAuthorization)
        ));
        assert!(SlackApp::new(config()).is_ok());
    }

    #[tokio::test]
    async fn bad_signature_is_401() {
        let mut req = signed_json(json!({"type": "event_callback"}));
        req.headers
            .insert(HEADER_SIGNATURE, HeaderValue::from_static("v0=deadbeef"));
        let res = app().run(req).await.unwrap();
        assert_eq!(res, CompleteResponse::plain(401, "Invalid signature"));
    }

    #[tokio::test]
    async fn ssl_check_short_circuits_before_signature() {
        let req = InboundRequest::http("/slack/events", HeaderMap::new(), "ssl_check=1&token=x");
        assert_eq!(app().run(req).await.unwrap(), CompleteResponse::plain(200, ""));
    }

    #[tokio::test]
    async fn wrong_path_is_404_not_found() {
        let cfg = AppConfig {
            events_path: Some("/slack/events".into()),
            ..config()
        };
        let app = app_with(cfg, Arc::default());
        let req = signed("/other", "application/json", "{}");
        assert_eq!(app.run(req).await.unwrap(), CompleteResponse::plain(404, "Not found"));
    }

    #[tokio::test]
    async fn unmatched_is_404_no_listener() {
        let res = app()
            .run(signed_json(json!({"type": "block_actions", "actions": [{"action_id": "x"}]})))
            .await
            .unwrap();
        assert_eq!(res, CompleteResponse::plain(404, "No listener found"));
    }

    #[tokio::test]
    async fn url_verification_answers_challenge() {
        let res = app()
            .run(signed_json(json!({"type": "url_verification", "challenge": "abc"})))
            .await
            .unwrap();
        assert_eq!(res, CompleteResponse::new(200, CONTENT_TYPE_TEXT, "abc"));
    }

    #[tokio::test]
    async fn command_form_body_reaches_listener() {
        let mut app = app();
        app.command(
            "/echo",
            Listener::ack(|req: SlackRequest| async move {
                let text = req.body["text"].as_str().unwrap_or_default().to_string();
                Ok(text)
            }),
        );
        let req = signed(
            "/slack/events",
            "application/x-www-form-urlencoded",
            "command=%2Fecho&text=hello+world&team_id=T1&user_id=U1",
        );
        let res = app.run(req).await.unwrap();
        assert_eq!(res, CompleteResponse::new(200, CONTENT_TYPE_TEXT, "hello world"));
    }

    #[tokio::test]
    async fn invalid_json_is_parse_error() {
        let req = signed("/slack/events", "application/json", "{not json");
        assert!(matches!(
            app().run(req).await,
            Err(DispatchError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn authorize_failure_without_handler_is_error() {
        let app = SlackApp::builder(config())
            .authorize(authorize_fn(|_ctx: PreAuthorizeContext| async {
                Err(AuthorizeError::Failed("no installation".into()))
            }))
            .client_factory(Arc::new(RecordingFactory::default()))
            .build()
            .unwrap();
        let res = app.run(signed_json(json!({"command": "/x"}))).await;
        assert!(matches!(res, Err(DispatchError::Authorize(_))));
    }

    #[tokio::test]
    async fn authorize_error_handler_substitutes_response() {
        let app = SlackApp::builder(config())
            .authorize(authorize_fn(|_ctx: PreAuthorizeContext| async {
                Err(AuthorizeError::Failed("no installation".into()))
            }))
            .authorize_error_handler(|_: &AuthorizeError, _: &PreAuthorizeRequest| {
                Some(AckResponse::status(401))
            })
            .client_factory(Arc::new(RecordingFactory::default()))
            .build()
            .unwrap();
        let res = app.run(signed_json(json!({"command": "/x"}))).await.unwrap();
        assert_eq!(res.status, 401);
    }

    #[tokio::test]
    async fn skip_listed_events_bypass_authorize() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let mut app = SlackApp::builder(config())
            .authorize(authorize_fn(move |_ctx: PreAuthorizeContext| {
                *counter.lock() += 1;
                async { Err(AuthorizeError::Failed("must not run".into())) }
            }))
            .client_factory(Arc::new(RecordingFactory::default()))
            .build()
            .unwrap();
        app.event("app_uninstalled", |_| async { Ok(()) });
        let res = app
            .run(signed_json(json!({"type": "event_callback", "team_id": "T1",
                "event": {"type": "app_uninstalled"}})))
            .await
            .unwrap();
        assert_eq!(res.status, 200);
        assert_eq!(*calls.lock(), 0);
    }

    #[tokio::test]
    async fn middleware_runs_in_order_and_short_circuits() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut app = app();
        let (a, b, c) = (order.clone(), order.clone(), order.clone());
        app.before_authorize(pre_authorize_fn(move |_| {
            a.lock().push("pre");
            Ok(None)
        }))
        .after_authorize(middleware_fn(move |_| {
            b.lock().push("post-1");
            Ok(Some(AckResponse::json(json!({"text": "stopped"}))))
        }))
        .use_middleware(middleware_fn(move |_| {
            c.lock().push("post-2");
            Ok(None)
        }));
        let res = app.run(signed_json(json!({"command": "/x"}))).await.unwrap();
        assert_eq!(res.content_type, CONTENT_TYPE_JSON);
        assert_eq!(*order.lock(), vec!["pre", "post-1"]);
    }

    #[tokio::test]
    async fn client_is_bound_to_function_token() {
        let factory = Arc::new(RecordingFactory::default());
        let mut app = app_with(config(), factory.clone());
        app.function("sample", |_| async { Ok(()) });
        let res = app
            .run(signed_json(json!({"type": "event_callback", "team_id": "T1",
                "event": {"type": "function_executed", "function_execution_id": "Fx1",
                    "bot_access_token": "xwfp-fn",
                    "function": {"callback_id": "sample_function"}}})))
            .await
            .unwrap();
        assert_eq!(res.status, 200);
        assert_eq!(factory.tokens(), vec![Some("xwfp-fn".to_string())]);
    }

    #[tokio::test]
    async fn function_token_read_from_top_level_interactivity() {
        let factory = Arc::new(RecordingFactory::default());
        let mut app = app_with(config(), factory.clone());
        app.action("approve", Listener::ack(|_| async { Ok(()) }));
        let res = app
            .run(signed_json(json!({"type": "block_actions", "team": {"id": "T1"},
                "user": {"id": "U1"}, "bot_access_token": "xwfp-interactive",
                "function_data": {"execution_id": "Fx2"},
                "actions": [{"action_id": "approve", "block_id": "b1", "type": "button"}]})))
            .await
            .unwrap();
        assert_eq!(res.status, 200);
        assert_eq!(factory.tokens(), vec![Some("xwfp-interactive".to_string())]);
    }

    #[tokio::test]
    async fn assistant_context_defaults_to_reply_metadata() {
        let factory = Arc::new(RecordingFactory::default());
        factory.api.respond_with(
            "conversations.replies",
            json!({"ok": true, "messages": [
                {"user": "U_SELF", "text": "Hi!", "ts": "1.2",
                    "metadata": {"event_type": "assistant_thread_context",
                        "event_payload": {"channel_id": "C_META"}}}
            ]}),
        );
        let seen = Arc::new(Mutex::new(None));
        let capture = seen.clone();
        let mut app = app_with(config(), factory.clone());
        app.use_middleware(middleware_fn(move |req| {
            *capture.lock() = req
                .context
                .assistant()
                .and_then(|a| a.thread_context().cloned());
            Ok(None)
        }));
        app.assistant(Assistant::new());
        let res = app
            .run(signed_json(json!({"type": "event_callback", "team_id": "T1",
                "event": {"type": "assistant_thread_context_changed",
                    "assistant_thread": {"user_id": "U1", "channel_id": "D1", "thread_ts": "1.1",
                        "context": {"channel_id": "C_EVENT"}}}})))
            .await
            .unwrap();
        assert_eq!(res.status, 200);
        let context = seen.lock().clone().unwrap();
        assert_eq!(context.channel_id.as_deref(), Some("C_META"));
        assert_eq!(factory.api.calls()[0].0, "conversations.replies");
    }

    #[tokio::test]
    async fn self_events_are_dropped_by_default() {
        let hits = Arc::new(Mutex::new(0));
        let seen = hits.clone();
        let mut app = app();
        app.any_message(move |_| {
            *seen.lock() += 1;
            async { Ok(()) }
        });
        let res = app
            .run(signed_json(json!({"type": "event_callback", "team_id": "T1",
                "event": {"type": "message", "bot_id": "B_SELF", "text": "echo"}})))
            .await
            .unwrap();
        assert_eq!(res, CompleteResponse::plain(200, ""));
        app.shutdown().await;
        assert_eq!(*hits.lock(), 0);
    }

    #[tokio::test]
    async fn socket_mode_skips_signature_and_reads_retry_attempt() {
        let cfg = AppConfig {
            signing_secret: None,
            socket_mode: true,
            app_token: Some("xapp-1".into()),
            ..config()
        };
        let seen = Arc::new(Mutex::new(None));
        let record = seen.clone();
        let mut app = app_with(cfg, Arc::default());
        app.command(
            "/x",
            Listener::ack(move |req: SlackRequest| {
                *record.lock() = Some((req.context.retry_num, req.context.retry_reason.clone()));
                async { Ok(()) }
            }),
        );
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let body = json!({"command": "/x", "retry_attempt": 2, "retry_reason": "timeout"});
        let res = app
            .run(InboundRequest::socket_mode(headers, body.to_string()))
            .await
            .unwrap();
        assert_eq!(res.status, 200);
        assert_eq!(*seen.lock(), Some((Some(2), Some("timeout".to_string()))));
    }

    #[tokio::test]
    async fn http_retry_headers_reach_context() {
        let seen = Arc::new(Mutex::new(None));
        let record = seen.clone();
        let mut app = app();
        app.command(
            "/x",
            Listener::ack(move |req: SlackRequest| {
                *record.lock() = Some((req.context.retry_num, req.context.retry_reason.clone()));
                async { Ok(()) }
            }),
        );
        let mut req = signed_json(json!({"command": "/x", "retry_attempt": 5}));
        req.headers.insert(HEADER_RETRY_NUM, HeaderValue::from_static("1"));
        req.headers
            .insert(HEADER_RETRY_REASON, HeaderValue::from_static("http_timeout"));
        app.run(req).await.unwrap();
        assert_eq!(*seen.lock(), Some((Some(1), Some("http_timeout".to_string()))));
    }

    #[tokio::test]
    async fn listener_error_is_dispatch_error() {
        let mut app = app();
        app.command(
            "/x",
            Listener::ack(|_| async { Err::<(), _>(anyhow::anyhow!("boom")) }),
        );
        let res = app.run(signed_json(json!({"command": "/x"}))).await;
        assert!(matches!(res, Err(DispatchError::Listener(_))));
    }
}
