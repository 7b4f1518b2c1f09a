use crate::error::ParseError;
use axum::http::{header::CONTENT_TYPE, HeaderMap};
use serde_json::{Map, Value};

/// Decode a request body into a JSON document.
///
/// JSON when the content type says so or the body starts with `{`. Otherwise
/// the body is form data: a `payload` field carries the JSON document for
/// interactive components, and slash commands become a flat string map.
pub fn parse_request_body(headers: &HeaderMap, raw_body: &str) -> Result<Value, ParseError> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if is_json || raw_body.starts_with('{') {
        return Ok(serde_json::from_str(raw_body)?);
    }

    let fields = parse_form(raw_body);
    if let Some((_, payload)) = fields.iter().find(|(k, _)| k == "payload") {
        return serde_json::from_str(payload).map_err(ParseError::PayloadField);
    }

    let mut map = Map::new();
    for (key, value) in fields {
        // First occurrence wins for repeated keys.
        map.entry(key).or_insert(Value::String(value));
    }
    Ok(Value::Object(map))
}

/// Split an `application/x-www-form-urlencoded` body into decoded pairs.
pub(crate) fn parse_form(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode_component(k), decode_component(v)),
            None => (decode_component(pair), String::new()),
        })
        .collect()
}

fn decode_component(s: &str) -> String {
    let spaced = s.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}
