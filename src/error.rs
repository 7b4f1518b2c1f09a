//! Error taxonomy for the dispatch core.
//!
//! Construction problems surface as [`ConfigError`] and are fatal. Per-request
//! failures surface as [`DispatchError`]; transports turn those into a 500.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid application setup. Never recovered at runtime.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("signing_secret is required unless socket_mode is enabled")]
    MissingSigningSecret,

    #[error("bot_token is required when no custom authorize function is supplied")]
    MissingAuthorization,

    #[error("app_token is required when socket_mode is enabled")]
    MissingAppToken,

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// The authorizer could not resolve an identity for the request.
#[derive(Debug, Error)]
pub enum AuthorizeError {
    #[error("authorize failed: {0}")]
    Failed(String),

    #[error("authorize failed: {0}")]
    Api(#[from] ApiError),
}

/// The request body could not be decoded.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid JSON in form field `payload`: {0}")]
    PayloadField(#[source] serde_json::Error),
}

/// A Web API call failed.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Slack {method} request failed: {source}")]
    Http {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Slack {method} failed ({status}): {body}")]
    Status {
        method: String,
        status: u16,
        body: String,
    },

    #[error("Slack {method} failed: {error}")]
    Platform { method: String, error: String },
}

/// Socket Mode connection setup failed.
#[derive(Debug, Error)]
pub enum SocketModeError {
    #[error("Slack: apps.connections.open failed: {0}")]
    Open(#[from] ApiError),

    #[error("Slack: apps.connections.open returned no URL")]
    MissingUrl,

    #[error("Slack: {0}")]
    InvalidUrl(String),

    #[error("Slack: envelope is missing `envelope_id`")]
    MissingEnvelopeId,

    #[error("Slack: WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
}

/// A request failed past the point where a protocol response (401/404) applies.
///
/// Listener and middleware errors are not caught by the core; they land here
/// and the transport decides how to answer.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Authorize(#[from] AuthorizeError),

    #[error(transparent)]
    Listener(#[from] anyhow::Error),
}
