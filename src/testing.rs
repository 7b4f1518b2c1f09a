//! Shared fixtures for unit tests.

use crate::authorize::AuthorizeResult;
use crate::client::{ApiClientFactory, AuthTest, SlackApi};
use crate::context::{PreAuthorizeContext, PreAuthorizeRequest, SlackContext, SlackRequest};
use crate::error::ApiError;
use crate::payload::PayloadType;
use async_trait::async_trait;
use axum::http::HeaderMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// In-memory Web API that records every call and answers `ok: true` unless a
/// response was scripted for the method.
#[derive(Default)]
pub struct RecordingApi {
    calls: Mutex<Vec<(String, Value)>>,
    responses: Mutex<HashMap<String, Value>>,
    auth_test: Option<AuthTest>,
    auth_error: Option<String>,
    auth_test_calls: AtomicUsize,
}

impl RecordingApi {
    pub fn with_auth_test(auth: AuthTest) -> Self {
        Self {
            auth_test: Some(auth),
            ..Self::default()
        }
    }

    pub fn failing_auth_test(error: &str) -> Self {
        Self {
            auth_error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn respond_with(&self, method: &str, response: Value) {
        self.responses.lock().insert(method.to_string(), response);
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub fn auth_test_calls(&self) -> usize {
        self.auth_test_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SlackApi for RecordingApi {
    async fn call(&self, method: &str, params: Value) -> Result<Value, ApiError> {
        self.calls.lock().push((method.to_string(), params));
        Ok(self
            .responses
            .lock()
            .get(method)
            .cloned()
            .unwrap_or_else(|| json!({"ok": true})))
    }

    async fn auth_test(&self) -> Result<AuthTest, ApiError> {
        self.auth_test_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.auth_error {
            return Err(ApiError::Platform {
                method: "auth.test".into(),
                error: error.clone(),
            });
        }
        Ok(self.auth_test.clone().unwrap_or_default())
    }
}

/// Factory handing out one shared [`RecordingApi`] and remembering tokens.
#[derive(Default)]
pub struct RecordingFactory {
    pub api: Arc<RecordingApi>,
    tokens: Mutex<Vec<Option<String>>>,
}

impl RecordingFactory {
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().clone()
    }
}

impl ApiClientFactory for RecordingFactory {
    fn client(&self, token: Option<&str>) -> Arc<dyn SlackApi> {
        self.tokens.lock().push(token.map(String::from));
        self.api.clone()
    }
}

pub fn pre_authorize_request(body: Value) -> PreAuthorizeRequest {
    PreAuthorizeRequest {
        payload_type: PayloadType::of(&body),
        context: PreAuthorizeContext::from_body(&body),
        raw_body: Arc::from(body.to_string()),
        body: Arc::new(body),
        headers: Arc::new(HeaderMap::new()),
    }
}

/// Authorized request whose bot is `B_SELF` / `U_SELF`.
pub fn slack_request(body: Value) -> SlackRequest {
    let pre = pre_authorize_request(body);
    let context = SlackContext::new(
        pre.context,
        AuthorizeResult::for_bot("B_SELF", "U_SELF", "xoxb-test"),
        Arc::new(RecordingApi::default()),
    );
    SlackRequest {
        body: pre.body,
        raw_body: pre.raw_body,
        headers: pre.headers,
        payload_type: pre.payload_type,
        context: Arc::new(context),
    }
}
