//! Socket Mode transport: receive envelopes over a WebSocket and answer each
//! with an ack frame carrying the dispatcher's response.

use crate::app::SlackApp;
use crate::client::{HttpSlackApi, SlackApi, DEFAULT_API_BASE_URL};
use crate::error::{ConfigError, SocketModeError};
use crate::request::{InboundRequest, HEADER_RETRY_NUM, HEADER_RETRY_REASON};
use crate::response::{CompleteResponse, CONTENT_TYPE_PLAIN};
use axum::http::{HeaderMap, HeaderValue};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message as WsMsg;
use tokio_util::sync::CancellationToken;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// A connection that lived this long resets the backoff.
const HEALTHY_CONNECTION: Duration = Duration::from_secs(30);
const HEARTBEAT_CHECK: Duration = Duration::from_secs(30);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);
const ACK_QUEUE: usize = 64;

// ── Frames ────────────────────────────────────────────────────────────────────

/// One request delivered over the socket.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketModeEnvelope {
    pub envelope_id: String,
    #[serde(rename = "type")]
    pub envelope_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub retry_attempt: Option<u32>,
    #[serde(default)]
    pub retry_reason: Option<String>,
}

impl SocketModeEnvelope {
    /// The payload as a JSON request, with retry details carried in the
    /// same headers the HTTP transport uses.
    pub fn to_request(&self) -> InboundRequest {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        if let Some(attempt) = self.retry_attempt {
            headers.insert(HEADER_RETRY_NUM, HeaderValue::from(attempt));
        }
        if let Some(value) = self
            .retry_reason
            .as_deref()
            .filter(|r| !r.is_empty())
            .and_then(|r| HeaderValue::from_str(r).ok())
        {
            headers.insert(HEADER_RETRY_REASON, value);
        }
        InboundRequest::socket_mode(headers, self.payload.to_string())
    }
}

#[derive(Debug)]
pub enum Frame {
    Hello,
    Disconnect(String),
    Envelope(SocketModeEnvelope),
}

pub fn parse_frame(text: &str) -> anyhow::Result<Frame> {
    let raw: Value = serde_json::from_str(text)
        .map_err(|e| anyhow::anyhow!("Slack: unparseable message: {e}"))?;
    match raw.get("type").and_then(Value::as_str).unwrap_or_default() {
        "hello" => Ok(Frame::Hello),
        "disconnect" => Ok(Frame::Disconnect(
            raw.get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        )),
        _ => {
            if raw.get("envelope_id").and_then(Value::as_str).is_none() {
                return Err(SocketModeError::MissingEnvelopeId.into());
            }
            let envelope = serde_json::from_value(raw)
                .map_err(|e| anyhow::anyhow!("Slack: envelope parse error: {e}"))?;
            Ok(Frame::Envelope(envelope))
        }
    }
}

/// Ack frame for an envelope. Plain-text bodies travel as `{text}`, JSON
/// bodies as-is; an empty or missing body sends the bare envelope id, and so
/// does any other body (logged).
pub fn ack_message(envelope_id: &str, response: Option<&CompleteResponse>) -> Value {
    let mut ack = Map::new();
    ack.insert("envelope_id".into(), Value::String(envelope_id.to_string()));
    let payload = response
        .filter(|r| !r.body.is_empty())
        .and_then(|r| {
            if r.content_type.starts_with(CONTENT_TYPE_PLAIN) {
                return Some(json!({ "text": r.body }));
            }
            match serde_json::from_str::<Value>(&r.body) {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::warn!(
                        envelope_id,
                        content_type = %r.content_type,
                        "Slack: ack body is neither text nor JSON, sending bare ack: {e}"
                    );
                    None
                }
            }
        });
    if let Some(payload) = payload {
        ack.insert("payload".into(), payload);
    }
    Value::Object(ack)
}

/// Dispatch one envelope and build its ack.
pub async fn handle_envelope(app: &SlackApp, envelope: &SocketModeEnvelope) -> Value {
    tracing::debug!(
        envelope_id = %envelope.envelope_id,
        envelope_type = %envelope.envelope_type,
        "Slack: envelope received"
    );
    match app.run(envelope.to_request()).await {
        Ok(response) => ack_message(&envelope.envelope_id, Some(&response)),
        Err(e) => {
            tracing::error!(envelope_id = %envelope.envelope_id, "Slack: dispatch failed: {e:#}");
            ack_message(&envelope.envelope_id, None)
        }
    }
}

/// Socket Mode URLs must be `wss://` on a Slack host.
pub fn validate_wss_url(url: &str) -> Result<(), SocketModeError> {
    if !url.starts_with("wss://") {
        return Err(SocketModeError::InvalidUrl(format!(
            "WebSocket URL must use wss:// scheme, got: {}",
            url.split("://").next().unwrap_or("unknown")
        )));
    }
    let host = url
        .strip_prefix("wss://")
        .and_then(|rest| rest.split(['/', '?']).next())
        .and_then(|host_port| host_port.split(':').next())
        .unwrap_or("");
    if host != "slack.com" && !host.ends_with(".slack.com") {
        return Err(SocketModeError::InvalidUrl(format!(
            "WebSocket URL host must be *.slack.com, got: {host}"
        )));
    }
    Ok(())
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct SocketModeClient {
    app: Arc<SlackApp>,
    api: HttpSlackApi,
}

impl SocketModeClient {
    pub fn new(app: Arc<SlackApp>) -> Result<Self, ConfigError> {
        let config = app.config();
        let app_token = config
            .app_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingAppToken)?;
        let base_url = config
            .api_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        Ok(Self {
            api: HttpSlackApi::with_base_url(&base_url, Some(app_token)),
            app,
        })
    }

    /// Call `apps.connections.open` for a fresh WebSocket URL.
    pub async fn open_connection(&self) -> Result<String, SocketModeError> {
        let resp = self.api.call("apps.connections.open", json!({})).await?;
        let url = resp
            .get("url")
            .and_then(Value::as_str)
            .ok_or(SocketModeError::MissingUrl)?;
        validate_wss_url(url)?;
        Ok(url.to_string())
    }

    /// One connection. Returns when the server disconnects or the link dies;
    /// the caller decides whether to reconnect.
    pub async fn connect(&self) -> Result<(), SocketModeError> {
        let wss_url = self.open_connection().await?;
        tracing::info!("Slack: Socket Mode connecting...");
        let (ws_stream, _) = tokio_tungstenite::connect_async(wss_url.as_str())
            .await
            .map_err(Box::new)?;
        let (mut write, mut read) = ws_stream.split();
        tracing::info!("Slack: Socket Mode connected");

        let (ack_tx, mut ack_rx) = tokio::sync::mpsc::channel::<String>(ACK_QUEUE);
        let mut heartbeat = tokio::time::interval(HEARTBEAT_CHECK);
        heartbeat.tick().await;
        let mut last_recv = Instant::now();

        loop {
            tokio::select! {
                biased;

                Some(ack) = ack_rx.recv() => {
                    if write.send(WsMsg::Text(ack.into())).await.is_err() {
                        tracing::warn!("Slack: ack send failed, reconnecting");
                        break;
                    }
                }

                _ = heartbeat.tick() => {
                    if last_recv.elapsed() > HEARTBEAT_TIMEOUT {
                        tracing::warn!("Slack: Socket Mode heartbeat timeout, reconnecting");
                        break;
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(WsMsg::Text(text))) => {
                            last_recv = Instant::now();
                            match parse_frame(&text) {
                                Ok(Frame::Hello) => tracing::info!("Slack: Socket Mode hello received"),
                                Ok(Frame::Disconnect(reason)) => {
                                    tracing::info!("Slack: disconnect requested (reason: {reason}), reconnecting");
                                    break;
                                }
                                Ok(Frame::Envelope(envelope)) => {
                                    let app = Arc::clone(&self.app);
                                    let tx = ack_tx.clone();
                                    tokio::spawn(async move {
                                        let ack = handle_envelope(&app, &envelope).await;
                                        if tx.send(ack.to_string()).await.is_err() {
                                            tracing::warn!(
                                                envelope_id = %envelope.envelope_id,
                                                "Slack: connection gone before ack"
                                            );
                                        }
                                    });
                                }
                                Err(e) => tracing::warn!("{e}"),
                            }
                        }
                        Some(Ok(WsMsg::Ping(d))) => {
                            last_recv = Instant::now();
                            let _ = write.send(WsMsg::Pong(d)).await;
                        }
                        Some(Ok(WsMsg::Close(_))) => {
                            tracing::info!("Slack: Socket Mode closed by server, reconnecting");
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::error!("Slack: Socket Mode read error: {e}");
                            break;
                        }
                        None => {
                            tracing::info!("Slack: Socket Mode stream ended, reconnecting");
                            break;
                        }
                        _ => last_recv = Instant::now(),
                    }
                }
            }
        }
        Ok(())
    }

    /// Stay connected until `shutdown` fires, reconnecting with exponential
    /// backoff. Outstanding lazy work is awaited before returning.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            let connect_time = Instant::now();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.connect() => {
                    if let Err(e) = result {
                        tracing::error!("Slack: Socket Mode error: {e}");
                    }
                }
            }
            if connect_time.elapsed() > HEALTHY_CONNECTION {
                backoff = INITIAL_BACKOFF;
            }
            tracing::info!("Slack: reconnecting in {}s", backoff.as_secs());
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = next_backoff(backoff);
        }
        tracing::info!("Slack: Socket Mode stopped; waiting for lazy listeners");
        self.app.shutdown().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
