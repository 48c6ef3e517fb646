//! Tool Server
//!
//! Axum router exposing a [`ToolRegistry`] over HTTP: catalog listing,
//! synchronous and streaming (SSE) invocation, and session bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use agent_core::{ConversationContext, ToolCallResult, ToolDefinition, ToolRegistry};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
};
use futures::{Stream, StreamExt, stream};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{MemorySessionStore, SessionStore};
use crate::wire::{
    CallToolRequest, ErrorResponse, HealthResponse, SessionCreated, StatusResponse, StreamFrame,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    /// Tools served by this process
    pub registry: Arc<ToolRegistry>,

    /// Conversations registered by clients
    pub sessions: Arc<dyn SessionStore>,
}

impl ServerState {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }

    fn touch_session(&self, session_id: Option<&str>) {
        if let Some(id) = session_id {
            if !self.sessions.touch(id) {
                debug!(session_id = %id, "Call references unknown session");
            }
        }
    }
}

/// Build the tool protocol router
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .route("/tools/{name}", get(get_tool))
        .route("/tools/{name}/call", post(call_tool))
        .route("/tools/{name}/stream", post(stream_tool))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", delete(delete_session))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Tool server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        tool_count: state.registry.len(),
        active_sessions: state.sessions.len(),
    })
}

async fn list_tools(State(state): State<ServerState>) -> Json<Value> {
    Json(json!({ "tools": state.registry.list() }))
}

async fn get_tool(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> Result<Json<ToolDefinition>, ApiError> {
    state
        .registry
        .definition(&name)
        .cloned()
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "TOOL_NOT_FOUND", format!("tool '{name}' does not exist")))
}

async fn create_session(
    State(state): State<ServerState>,
    Json(context): Json<ConversationContext>,
) -> Json<SessionCreated> {
    let session_id = state.sessions.create(context);
    info!(session_id = %session_id, "Session created");
    Json(SessionCreated {
        session_id,
        status: "created".into(),
    })
}

async fn delete_session(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    if state.sessions.delete(&id) {
        info!(session_id = %id, "Session deleted");
        Ok(Json(StatusResponse {
            status: "deleted".into(),
        }))
    } else {
        Err(api_error(StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", "session does not exist"))
    }
}

/// Always answers 200; failures are reported inside the result
async fn call_tool(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Json(request): Json<CallToolRequest>,
) -> Json<ToolCallResult> {
    debug!(tool = %name, "Synchronous tool call");
    state.touch_session(request.session_id.as_deref());
    Json(state.registry.safe_execute(&name, request.parameters).await)
}

/// `tool_call` (started), then one `tool_result` or `error` frame.
///
/// The tool runs lazily inside the response stream, so a client that
/// disconnects cancels it.
async fn stream_tool(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Json(request): Json<CallToolRequest>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    debug!(tool = %name, "Streaming tool call");
    let started = StreamFrame::started(&name, &request.parameters);

    let finished = async move {
        if state.registry.contains(&name) {
            state.touch_session(request.session_id.as_deref());
            let result = state.registry.safe_execute(&name, request.parameters).await;
            StreamFrame::result(&result)
        } else {
            warn!(tool = %name, "Stream requested for unknown tool");
            StreamFrame::error(&name, format!("unknown tool: {name}"))
        }
    };

    let frames = stream::once(async move { started })
        .chain(stream::once(finished))
        .map(|frame| Event::default().json_data(frame));

    Sse::new(frames).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
