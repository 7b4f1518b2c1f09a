//! Inbound request envelope shared by the HTTP and Socket Mode transports.

pub mod parser;
pub mod verify;

use axum::http::HeaderMap;

pub use parser::parse_request_body;
pub use verify::{is_ssl_check, verify_slack_request};

pub const HEADER_SIGNATURE: &str = "x-slack-signature";
pub const HEADER_TIMESTAMP: &str = "x-slack-request-timestamp";
pub const HEADER_RETRY_NUM: &str = "x-slack-retry-num";
pub const HEADER_RETRY_REASON: &str = "x-slack-retry-reason";

/// Where a request came from. Socket Mode requests skip signature checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    SocketMode,
}

/// Raw request as received by a transport. Never mutated by the core.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub transport: Transport,
    /// Request path for HTTP; `None` for Socket Mode.
    pub path: Option<String>,
    pub headers: HeaderMap,
    pub raw_body: String,
}

impl InboundRequest {
    pub fn http(path: impl Into<String>, headers: HeaderMap, raw_body: impl Into<String>) -> Self {
        Self {
            transport: Transport::Http,
            path: Some(path.into()),
            headers,
            raw_body: raw_body.into(),
        }
    }

    pub fn socket_mode(headers: HeaderMap, raw_body: impl Into<String>) -> Self {
        Self {
            transport: Transport::SocketMode,
            path: None,
            headers,
            raw_body: raw_body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
