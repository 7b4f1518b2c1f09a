use super::{header_str, parser::parse_form, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Requests older than this are treated as replays.
pub const MAX_REQUEST_AGE_SECS: i64 = 300;

// ── Signature verification ────────────────────────────────────────────────────

/// Verify `x-slack-signature` against HMAC-SHA256 of `v0:{timestamp}:{body}`.
///
/// `now` is the current Unix time in seconds. A timestamp exactly
/// [`MAX_REQUEST_AGE_SECS`] old is still accepted.
pub fn verify_slack_request(signing_secret: &str, headers: &HeaderMap, body: &str, now: i64) -> bool {
    let Some(timestamp) = header_str(headers, HEADER_TIMESTAMP) else {
        tracing::debug!("Slack: {HEADER_TIMESTAMP} header missing");
        return false;
    };
    let Ok(ts) = timestamp.trim().parse::<i64>() else {
        tracing::debug!("Slack: {HEADER_TIMESTAMP} is not a number: {timestamp}");
        return false;
    };
    if ts < now - MAX_REQUEST_AGE_SECS {
        tracing::debug!("Slack: stale request timestamp {ts} (now {now})");
        return false;
    }
    let Some(signature) = header_str(headers, HEADER_SIGNATURE) else {
        tracing::debug!("Slack: {HEADER_SIGNATURE} header missing");
        return false;
    };
    let Some(provided) = signature.strip_prefix("v0=") else {
        return false;
    };

    match compute_digest(signing_secret, timestamp, body) {
        Some(expected) => constant_time_eq(expected.as_bytes(), provided.as_bytes()),
        None => false,
    }
}

/// Build the `v0=…` header value Slack would send for this body.
pub fn sign_request(signing_secret: &str, timestamp: &str, body: &str) -> Option<String> {
    compute_digest(signing_secret, timestamp, body).map(|hex| format!("v0={hex}"))
}

fn compute_digest(secret: &str, timestamp: &str, body: &str) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

// ── SSL check probe ───────────────────────────────────────────────────────────

/// True for Slack's unsigned `ssl_check=1&token=…` health probe.
pub fn is_ssl_check(raw_body: &str) -> bool {
    if !raw_body.contains("ssl_check=") {
        return false;
    }
    let fields = parse_form(raw_body);
    let get = |key: &str| {
        fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };
    get("ssl_check") == Some("1") && get("token").is_some_and(|t| !t.is_empty())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
