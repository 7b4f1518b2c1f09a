//! HTTP transport: an axum server that hands every request to the dispatcher.

use crate::app::SlackApp;
use crate::request::InboundRequest;
use crate::response::CompleteResponse;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

// ── Router ────────────────────────────────────────────────────────────────────

/// Every path and method goes to the dispatcher, which owns the path check.
pub fn router(app: Arc<SlackApp>) -> Router {
    let max_body_bytes = app.config().server.max_body_bytes;
    Router::new()
        .fallback(handle)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

async fn handle(
    State(app): State<Arc<SlackApp>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(raw_body) = String::from_utf8(body.to_vec()) else {
        tracing::warn!("Slack: request body is not UTF-8");
        return (StatusCode::BAD_REQUEST, "Invalid body").into_response();
    };
    let request = InboundRequest::http(uri.path(), headers, raw_body);
    match app.run(request).await {
        Ok(response) => to_http(response),
        Err(e) => {
            tracing::error!("Slack: dispatch failed: {e:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

fn to_http(response: CompleteResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    )
        .into_response()
}

// ── Serve ─────────────────────────────────────────────────────────────────────

/// Listen on `[server] host:port` until Ctrl-C, then wait for lazy work.
pub async fn serve(app: Arc<SlackApp>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", app.config().server.host, app.config().server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Slack: listening on {addr}");

    axum::serve(listener, router(app.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Slack: waiting for lazy listeners to finish");
    app.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Slack: failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
