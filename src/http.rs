//! HTTP surface: health probe and the SSE relay endpoint.
//!
//! `POST /v1/relay` accepts a batch of fragments (optionally paced to mimic
//! a token generator), feeds them through a fresh [`StreamSession`], and
//! streams the resulting frames back as `text/event-stream`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::models::Fragment;
use crate::stream::sender::TransportSender;
use crate::stream::{StreamHandle, StreamSession};
use crate::transport::sse::SseTransport;
use crate::transport::CorrelationContext;
use crate::{AppError, Result};

/// Shared state for HTTP handlers.
pub struct HttpState {
    /// Relay configuration.
    pub config: Arc<RelayConfig>,
    /// Parent token; every session gets a child token.
    pub cancel: CancellationToken,
}

/// Body of `POST /v1/relay`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    /// Request correlation id echoed in every frame; generated when absent.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Fragments to stream, in order.
    #[serde(default)]
    pub fragments: Vec<Fragment>,
    /// Pause between fragments, in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
}

/// Handler for `GET /health`.
async fn health() -> &'static str {
    "ok"
}

/// Handler for `POST /v1/relay`.
async fn relay(State(state): State<Arc<HttpState>>, Json(request): Json<RelayRequest>) -> Response {
    let context = request
        .request_id
        .filter(|id| !id.is_empty())
        .map_or_else(CorrelationContext::generate, CorrelationContext::new);
    let (transport, body) = SseTransport::open(context.clone(), &state.config.transport);
    let sender = TransportSender::new(Arc::new(transport), context.clone());
    let session_id = uuid::Uuid::new_v4().to_string();

    info!(session_id, request_id = %context.request_id, fragments = request.fragments.len(), "relay stream opened");

    let handle = StreamSession::new(
        session_id,
        state.config.stream.clone(),
        sender,
        state.cancel.child_token(),
    )
    .spawn();

    tokio::spawn(produce(
        handle,
        request.fragments,
        Duration::from_millis(request.delay_ms),
    ));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Feed fragments into a session and finalize it.
async fn produce(handle: StreamHandle, fragments: Vec<Fragment>, delay: Duration) {
    for fragment in fragments {
        if let Err(err) = handle.enqueue(fragment) {
            warn!(session_id = handle.session_id(), %err, "relay producer stopped early");
            return;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    match handle.close().await {
        Ok(outcome) => info!(
            session_id = handle.session_id(),
            terminal = outcome.frame_sent(),
            "relay stream finished"
        ),
        Err(err) => error!(session_id = handle.session_id(), %err, "relay stream failed to finalize"),
    }
}

/// Build the HTTP router.
#[must_use]
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/relay", post(relay))
        .with_state(state)
}

/// Serve on `127.0.0.1:<config.http_port>` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the port cannot be bound, or `AppError::Io`
/// if the server fails.
pub async fn serve(config: Arc<RelayConfig>, ct: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], config.http_port));
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind relay on {bind}: {err}")))?;
    serve_listener(listener, config, ct).await
}

/// Serve on an already-bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve_listener(
    listener: TcpListener,
    config: Arc<RelayConfig>,
    ct: CancellationToken,
) -> Result<()> {
    let bind = listener.local_addr()?;
    let state = Arc::new(HttpState {
        config,
        cancel: ct.clone(),
    });

    info!(%bind, "starting HTTP/SSE relay");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("relay server error: {err}")))?;

    info!("HTTP/SSE relay shut down");
    Ok(())
}
