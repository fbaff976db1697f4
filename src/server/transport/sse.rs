//! HTTP transport: a server-sent event stream per client plus a POST endpoint
//! for client messages.
//!
//! `GET /sse` opens a session. Its first event, `endpoint`, carries the URL
//! the client posts JSON-RPC messages to (`/message?sessionId=<id>`).
//! Responses are delivered on the session's stream as `message` events.

use crate::server::McpServer;
use crate::server::protocol::JsonRpcResponse;
use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SSE_PATH: &str = "/sse";
pub const MESSAGE_PATH: &str = "/message";

type Sessions = Arc<Mutex<HashMap<String, mpsc::Sender<JsonRpcResponse>>>>;

#[derive(Clone)]
struct SseState {
    server: Arc<McpServer>,
    sessions: Sessions,
    shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// Removes its session from the map when the client's stream is dropped.
struct SessionGuard {
    id: String,
    sessions: Sessions,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
        debug!(session = %self.id, "sse session closed");
    }
}

pub fn router(server: Arc<McpServer>, shutdown: CancellationToken) -> Router {
    let state = SseState {
        server,
        sessions: Arc::default(),
        shutdown,
    };

    Router::new()
        .route(SSE_PATH, get(open_session))
        .route(MESSAGE_PATH, post(post_message))
        .with_state(state)
}

pub async fn serve(server: Arc<McpServer>, port: u16, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind SSE listener on port {port}"))?;

    serve_listener(server, listener, shutdown).await
}

/// Serves until `shutdown` is cancelled. Open event streams end on shutdown,
/// so the graceful drain does not wait on idle clients.
pub async fn serve_listener(
    server: Arc<McpServer>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr().context("failed to read listener address")?;
    info!(%addr, "sse transport listening");

    let app = router(server, shutdown.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("sse server error")
}

async fn open_session(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<JsonRpcResponse>(64);

    state
        .sessions
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(id.clone(), tx);
    debug!(session = %id, "sse session opened");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{MESSAGE_PATH}?sessionId={id}"));

    let guard = SessionGuard {
        id,
        sessions: Arc::clone(&state.sessions),
    };
    let responses = stream::unfold(
        (rx, guard, state.shutdown),
        |(mut rx, guard, shutdown)| async move {
            let response = tokio::select! {
                _ = shutdown.cancelled() => None,
                response = rx.recv() => response,
            }?;
            Some((
                Ok::<_, Infallible>(message_event(&response)),
                (rx, guard, shutdown),
            ))
        },
    );

    let stream = stream::once(async move { Ok::<_, Infallible>(endpoint) }).chain(responses);

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}

async fn post_message(
    State(state): State<SseState>,
    Query(query): Query<SessionQuery>,
    body: String,
) -> Response {
    let sender = state
        .sessions
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&query.session_id)
        .cloned();
    let Some(sender) = sender else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    let server = Arc::clone(&state.server);
    let cancel = state.shutdown.child_token();
    tokio::spawn(async move {
        if let Some(response) = server.handle_message(&body, &cancel).await {
            if sender.send(response).await.is_err() {
                debug!("sse client disconnected before response");
            }
        }
    });

    StatusCode::ACCEPTED.into_response()
}

fn message_event(response: &JsonRpcResponse) -> Event {
    Event::default()
        .event("message")
        .json_data(response)
        .unwrap_or_else(|err| {
            warn!(error = %err, "failed to encode response event");
            Event::default().comment("encode error")
        })
}
