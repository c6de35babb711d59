//! HTTP surface of the relay, built on axum.
//!
//! Routes:
//! - `POST /api/experiment/stream`: body is a [`RelayRequest`]. Answers with a
//!   `text/event-stream` of `data: <json>\n\n` frames, or with plain JSON `{"finished": true}`
//!   when the turn limit was already reached. Anything that fails before streaming starts,
//!   including a body that does not parse, is a 500 with `{"error": "Internal server error"}`.
//! - `GET /health`: `{"status": "ok"}`.
//!
//! Every streaming request runs under a child of the server's shutdown token, so cancelling
//! that token both stops accepting connections and ends in-flight upstream streams.

use crate::relay::{Relay, RelayOutcome, RelayRequest};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Path of the streaming endpoint.
pub const STREAM_PATH: &str = "/api/experiment/stream";

#[derive(Clone)]
struct AppState {
    relay: Arc<Relay>,
    shutdown: CancellationToken,
}

/// Build the relay router.
pub fn router(relay: Arc<Relay>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route(STREAM_PATH, post(stream_experiment))
        .route("/health", get(health))
        .with_state(AppState { relay, shutdown })
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn stream_experiment(
    State(state): State<AppState>,
    payload: Result<Json<RelayRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            log::error!("stream_experiment: rejected request body: {}", rejection);
            return internal_error();
        }
    };

    log::info!(
        "stream_experiment: turn {} agent {} ({} history entries)",
        request.current_turn,
        request.current_agent,
        request.conversation_history.len()
    );

    match state.relay.prepare(request, state.shutdown.child_token()) {
        Ok(RelayOutcome::Finished) => Json(json!({"finished": true})).into_response(),
        Ok(RelayOutcome::Stream(events)) => {
            let frames = events.map(|event| Event::default().json_data(&event));
            (
                [
                    (header::CACHE_CONTROL, "no-cache"),
                    (header::CONNECTION, "keep-alive"),
                ],
                Sse::new(frames),
            )
                .into_response()
        }
        Err(err) => {
            log::error!("stream_experiment: {}", err);
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal server error"})),
    )
        .into_response()
}

/// A relay server running on a background task.
pub struct RelayServer {
    addr: SocketAddr,
    handle: JoinHandle<std::io::Result<()>>,
}

impl RelayServer {
    /// Address actually bound (useful when binding port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL of the streaming endpoint.
    pub fn stream_url(&self) -> String {
        format!("http://{}{}", self.addr, STREAM_PATH)
    }

    /// Wait for the server task to end (after the shutdown token is cancelled).
    pub async fn join(self) -> std::io::Result<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(std::io::Error::other(err)),
        }
    }
}

/// Bind `addr` and serve in the background until `shutdown` is cancelled.
pub async fn spawn(
    addr: SocketAddr,
    relay: Arc<Relay>,
    shutdown: CancellationToken,
) -> std::io::Result<RelayServer> {
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let app = router(relay, shutdown.clone());
    log::info!("relay listening on http://{}", addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    Ok(RelayServer { addr, handle })
}

/// Bind `addr` and serve until `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    relay: Arc<Relay>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    spawn(addr, relay, shutdown).await?.join().await
}
