//! HTTP server: the streaming chat endpoint and health check.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use placechat_core::session::SessionStore;

use crate::chat::{ChatStreamSession, ChatTurn};
use crate::error::ChatError;
use crate::state::GatewayState;

const MIN_LIMIT: i64 = 1;
const MAX_LIMIT: i64 = 100;

/// Body of `POST /api/v1/chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    10
}

impl ChatRequest {
    pub fn parse(body: &[u8]) -> Result<Self, ChatError> {
        let request: Self = serde_json::from_slice(body)
            .map_err(|e| ChatError::InvalidRequest(format!("Invalid request body: {e}")))?;
        if !(MIN_LIMIT..=MAX_LIMIT).contains(&request.limit) {
            return Err(ChatError::InvalidRequest(format!(
                "limit must be between {MIN_LIMIT} and {MAX_LIMIT}, got {}",
                request.limit
            )));
        }
        Ok(request)
    }
}

/// Build the router. CORS mirrors the caller's origin, method and headers so
/// credentialed requests from any origin are accepted.
pub fn router(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/chat", post(chat_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server on `addr` and serve until Ctrl+C.
pub async fn start_gateway(state: Arc<GatewayState>, addr: &str) -> anyhow::Result<()> {
    let sweeper = spawn_session_sweeper(
        Arc::clone(&state.sessions),
        sweep_interval(Duration::from_secs(state.config.session_idle_ttl_secs())),
    );
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Chat server listening on {addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();
    served?;

    Ok(())
}

/// Check for idle sessions a few times per TTL, at most once a minute.
fn sweep_interval(idle_ttl: Duration) -> Duration {
    (idle_ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

fn spawn_session_sweeper(
    sessions: Arc<dyn SessionStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = sessions.evict_idle().await {
                warn!(%e, "Session eviction failed");
            }
        }
    })
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.count().await,
    }))
}

async fn chat_handler(
    State(state): State<Arc<GatewayState>>,
    body: Bytes,
) -> Result<Response, ChatError> {
    let request = ChatRequest::parse(&body)?;
    info!(
        session_id = %request.session_id,
        limit = request.limit,
        chars = request.message.chars().count(),
        "Chat request"
    );

    let chat = ChatStreamSession::open(
        &state,
        ChatTurn {
            session_id: request.session_id,
            message: request.message,
        },
    )
    .await?;

    let body = chat
        .into_stream()
        .map(|frame| Ok::<Bytes, Infallible>(frame.into()));
    Ok(sse_response(body))
}

fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(%e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
