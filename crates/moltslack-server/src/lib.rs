pub mod config;
pub mod routes;
pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use libmoltslack::SessionRegistry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

/// Shared application state.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    /// Cancelled on shutdown so open event streams end.
    pub shutdown: CancellationToken,
    pub summary_timeout: Duration,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, summary_timeout: Duration) -> Self {
        Self {
            registry,
            shutdown: CancellationToken::new(),
            summary_timeout,
        }
    }
}

pub fn app(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/chats", get(routes::list_chats).post(routes::create_chat))
        .route("/api/chats/{id}", get(routes::chat_info))
        .route("/api/chats/{id}/input", post(routes::send_input))
        .route("/api/chats/{id}/resize", post(routes::resize))
        .route("/api/chats/{id}/tasks", post(routes::start_task))
        .route("/api/chats/{id}/summary", post(routes::summarize))
        .route("/api/chats/{id}/stop", post(routes::stop_chat))
        .route("/api/chats/{id}/events", get(sse::chat_events))
        .layer(cors)
        .with_state(state)
}

pub fn build_cors(origins: &[String]) -> Result<CorsLayer> {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    if origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any));
    }

    let mut headers = Vec::with_capacity(origins.len());
    for origin in origins {
        headers.push(
            HeaderValue::from_str(origin)
                .with_context(|| format!("invalid --allow-origin value: {origin}"))?,
        );
    }

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(headers))
        .allow_methods(methods)
        .allow_headers(Any))
}

/// Serve until `signal` resolves, then end event streams and stop all sessions.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    cors: CorsLayer,
    signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let router = app(Arc::clone(&state), cors);
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            signal.await;
            info!("shutting down...");
            shutdown.cancel();
        })
        .await
        .context("http server failed");

    state.registry.shutdown();
    result
}
