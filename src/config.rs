//! Application configuration: TOML file plus `SLACK_*` environment overlay.

use crate::authorize::DEFAULT_SKIP_AUTHORIZE_EVENTS;
use crate::error::ConfigError;
use crate::middleware::DEFAULT_SELF_EVENT_KEEP_TYPES;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_SIGNING_SECRET: &str = "SLACK_SIGNING_SECRET";
pub const ENV_BOT_TOKEN: &str = "SLACK_BOT_TOKEN";
pub const ENV_APP_TOKEN: &str = "SLACK_APP_TOKEN";
pub const ENV_LOGGING_LEVEL: &str = "SLACK_LOGGING_LEVEL";
pub const ENV_EVENTS_PATH: &str = "SLACK_EVENTS_PATH";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level app settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AppConfig {
    /// Signing secret for HTTP request verification.
    pub signing_secret: Option<String>,
    /// Bot token (`xoxb-…`) for the single-workspace authorizer.
    pub bot_token: Option<String>,
    /// App-level token (`xapp-…`) for Socket Mode.
    pub app_token: Option<String>,
    /// Receive requests over a Socket Mode WebSocket instead of HTTP.
    pub socket_mode: bool,
    /// Only accept HTTP requests on this path.
    pub events_path: Option<String>,
    /// Submit lazy listeners after the ack completes instead of before.
    pub start_lazy_listener_after_ack: bool,
    /// Drop events caused by the app itself.
    pub ignore_self_events: bool,
    /// Event types delivered even when the app caused them.
    pub self_event_keep_types: Vec<String>,
    /// Event types dispatched without running the authorizer.
    pub skip_authorize_events: Vec<String>,
    /// Tracing filter directive, e.g. `info` or `slack_dispatch=debug`.
    pub log_level: Option<String>,
    /// Web API base URL.
    pub api_base_url: Option<String>,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            bot_token: None,
            app_token: None,
            socket_mode: false,
            events_path: None,
            start_lazy_listener_after_ack: false,
            ignore_self_events: true,
            self_event_keep_types: DEFAULT_SELF_EVENT_KEEP_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            skip_authorize_events: DEFAULT_SKIP_AUTHORIZE_EVENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            log_level: None,
            api_base_url: None,
            server: ServerConfig::default(),
        }
    }
}

/// `<config dir>/slack-dispatch/config.toml` for the current user.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "slack-dispatch")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

impl AppConfig {
    /// Load from `path`, or from the default location when it exists, then
    /// apply the environment overlay.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(&PathBuf::from(shellexpand::tilde(p).as_ref()))?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `SLACK_*` variables. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(ENV_SIGNING_SECRET) {
            self.signing_secret = Some(v);
        }
        if let Some(v) = get(ENV_BOT_TOKEN) {
            self.bot_token = Some(v);
        }
        if let Some(v) = get(ENV_APP_TOKEN) {
            self.app_token = Some(v);
        }
        if let Some(v) = get(ENV_LOGGING_LEVEL) {
            self.log_level = Some(v.to_lowercase());
        }
        if let Some(v) = get(ENV_EVENTS_PATH) {
            self.events_path = Some(v);
        }
    }

    /// Construction-time checks. `custom_authorize` is true when the app
    /// supplies its own authorizer instead of a bot token.
    pub fn validate(&self, custom_authorize: bool) -> Result<(), ConfigError> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        if !self.socket_mode && !present(&self.signing_secret) {
            return Err(ConfigError::MissingSigningSecret);
        }
        if self.socket_mode && !present(&self.app_token) {
            return Err(ConfigError::MissingAppToken);
        }
        if !custom_authorize && !present(&self.bot_token) {
            return Err(ConfigError::MissingAuthorization);
        }
        Ok(())
    }
}

/// JSON schema of [`AppConfig`], pretty-printed.
pub fn schema_json() -> anyhow::Result<String> {
    let schema = schemars::schema_for!(AppConfig);
    Ok(serde_json::to_string_pretty(&schema)?)
}
