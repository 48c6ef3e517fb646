//! Tool Client
//!
//! HTTP client for a remote tool server. Holds one pooled connection per
//! instance behind a small state machine:
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──/health ok──▶ Connected
//!       ▲                          │                         │
//!       └──────── probe failed ────┘◀──── call failed ───────┘
//! ```
//!
//! The inherent `try_*` methods surface [`ProtocolError`]s. The
//! [`RemoteToolSource`] impl absorbs them into empty catalogs and failed
//! results so the reasoning engine never sees transport errors.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use agent_core::{
    ConversationContext, RemoteEvent, RemoteEventStream, RemoteToolSource, ToolCallResult,
    ToolDefinition, ToolParams,
};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, future};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{ProtocolError, Result};
use crate::sse::SseDecoder;
use crate::wire::{
    CallToolRequest, ErrorResponse, HealthResponse, SessionCreated, StreamFrame, ToolList,
    definition_from_wire, result_from_wire,
};

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server root, e.g. `http://localhost:8001`
    pub base_url: String,

    /// Health probe deadline
    pub connect_timeout: Duration,

    /// Deadline for synchronous calls and session requests
    pub request_timeout: Duration,

    /// Longest silence tolerated on an open event stream
    pub stream_timeout: Duration,

    /// Deadline for catalog listing
    pub list_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: server_url_from_parts("localhost", 8001),
            connect_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(30),
            list_timeout: Duration::from_secs(20),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self.stream_timeout = timeout;
        self
    }
}

/// Build a server root from host and port. Default ports are omitted and
/// port 443 selects `https`.
pub fn server_url_from_parts(host: &str, port: u16) -> String {
    match port {
        443 => format!("https://{host}"),
        80 => format!("http://{host}"),
        _ => format!("http://{host}:{port}"),
    }
}

/// Observable connection state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(reqwest::Client),
}

impl ConnectionState {
    const fn status(&self) -> ConnectionStatus {
        match self {
            Self::Disconnected => ConnectionStatus::Disconnected,
            Self::Connecting => ConnectionStatus::Connecting,
            Self::Connected(_) => ConnectionStatus::Connected,
        }
    }
}

/// Holds the state lock across a probe. A probe abandoned mid-flight leaves
/// `Disconnected` behind, never `Connecting`.
struct ConnectingGuard<'a> {
    state: MutexGuard<'a, ConnectionState>,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if matches!(*self.state, ConnectionState::Connecting) {
            *self.state = ConnectionState::Disconnected;
        }
    }
}

struct Inner {
    config: ClientConfig,
    base_url: String,
    state: Mutex<ConnectionState>,
}

/// Remote tool server client. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct ToolClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ToolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolClient")
            .field("base_url", &self.inner.base_url)
            .finish_non_exhaustive()
    }
}

/// A borrowed, connected transport. Dropping it releases nothing but the
/// clone of the pooled client.
pub struct ClientSession {
    http: reqwest::Client,
    base_url: String,
}

impl ClientSession {
    fn url(&self, segments: &[&str]) -> Result<reqwest::Url> {
        endpoint(&self.base_url, segments)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let response = self.http.get(self.url(segments)?).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T> {
        let response = self.http.post(self.url(segments)?).json(body).send().await?;
        Ok(check_status(response).await?.json().await?)
    }
}

/// `base_url` extended with percent-encoded path segments
fn endpoint(base_url: &str, segments: &[&str]) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(base_url)
        .map_err(|e| ProtocolError::Connection(format!("invalid server URL '{base_url}': {e}")))?;
    url.path_segments_mut()
        .map_err(|()| ProtocolError::Connection(format!("server URL '{base_url}' cannot have a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

impl ToolClient {
    pub fn new(config: ClientConfig) -> Self {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            inner: Arc::new(Inner {
                config,
                base_url,
                state: Mutex::new(ConnectionState::Disconnected),
            }),
        }
    }

    pub fn from_url(base_url: impl Into<String>) -> Self {
        Self::new(ClientConfig::new(base_url))
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().await.status()
    }

    pub async fn is_connected(&self) -> bool {
        self.status().await == ConnectionStatus::Connected
    }

    /// Connect if not already connected
    pub async fn connect(&self) -> Result<()> {
        self.session().await.map(drop)
    }

    /// A connected transport, (re)connecting lazily
    pub async fn session(&self) -> Result<ClientSession> {
        let mut guard = ConnectingGuard {
            state: self.inner.state.lock().await,
        };
        let state = &mut *guard.state;
        if let ConnectionState::Connected(http) = &*state {
            return Ok(self.wrap(http.clone()));
        }

        *state = ConnectionState::Connecting;
        match self.probe().await {
            Ok((http, health)) => {
                info!(
                    url = %self.inner.base_url,
                    tools = health.tool_count,
                    version = %health.version,
                    "Connected to tool server"
                );
                *state = ConnectionState::Connected(http.clone());
                Ok(self.wrap(http))
            }
            Err(e) => {
                warn!(url = %self.inner.base_url, error = %e, "Tool server unreachable");
                *state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Drop the transport
    pub async fn close(&self) {
        let mut state = self.inner.state.lock().await;
        if matches!(*state, ConnectionState::Connected(_)) {
            debug!(url = %self.inner.base_url, "Closing tool server connection");
        }
        *state = ConnectionState::Disconnected;
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let limit = self.inner.config.request_timeout;
        self.guarded("health", limit, |s| async move { s.get(&["health"]).await })
            .await
    }

    pub async fn try_list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let limit = self.inner.config.list_timeout;
        let list: ToolList = self
            .guarded("list tools", limit, |s| async move { s.get(&["tools"]).await })
            .await?;
        let definitions: Vec<_> = list.tools.iter().filter_map(definition_from_wire).collect();
        debug!(count = definitions.len(), "Fetched remote tool catalog");
        Ok(definitions)
    }

    pub async fn try_call_tool(
        &self,
        name: &str,
        params: &ToolParams,
        session_id: Option<&str>,
    ) -> Result<ToolCallResult> {
        let limit = self.inner.config.request_timeout;
        let request = CallToolRequest {
            parameters: params.clone(),
            session_id: session_id.map(String::from),
        };
        let body = self
            .guarded("tool call", limit, |s| async move {
                let url = s.url(&["tools", name, "call"])?;
                let response = s.http.post(url).json(&request).send().await?;
                Ok(check_status(response).await?.text().await?)
            })
            .await?;

        let value = serde_json::from_str::<Value>(&body).unwrap_or_else(|_| json!({ "text": body }));
        let mut result = result_from_wire(value);
        if result.tool_name.is_none() {
            result.tool_name = Some(name.to_string());
        }
        Ok(result)
    }

    pub async fn try_create_session(&self, context: &ConversationContext) -> Result<String> {
        let limit = self.inner.config.request_timeout;
        let created: SessionCreated = self
            .guarded("create session", limit, |s| async move {
                s.post(&["sessions"], context).await
            })
            .await?;
        Ok(created.session_id)
    }

    /// `Ok(false)` when the server does not know the session
    pub async fn try_delete_session(&self, session_id: &str) -> Result<bool> {
        let limit = self.inner.config.request_timeout;
        let outcome = self
            .guarded("delete session", limit, |s| async move {
                let url = s.url(&["sessions", session_id])?;
                let response = s.http.delete(url).send().await?;
                check_status(response).await.map(drop)
            })
            .await;
        match outcome {
            Ok(()) => Ok(true),
            Err(ProtocolError::Status { status: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Open `POST /tools/{name}/stream` and decode its frames.
    ///
    /// The returned stream ends early and silently on transport failure or
    /// when no bytes arrive within `stream_timeout`.
    pub async fn try_stream_frames(
        &self,
        name: &str,
        request: &CallToolRequest,
    ) -> Result<BoxStream<'static, StreamFrame>> {
        let limit = self.inner.config.stream_timeout;
        let response = self
            .guarded("open stream", limit, |s| async move {
                let url = s.url(&["tools", name, "stream"])?;
                let response = s
                    .http
                    .post(url)
                    .header(reqwest::header::ACCEPT, "text/event-stream")
                    .json(request)
                    .send()
                    .await?;
                check_status(response).await
            })
            .await?;
        Ok(decode_frames(response, limit, self.clone()))
    }

    // ------------------------------------------------------------------------

    fn wrap(&self, http: reqwest::Client) -> ClientSession {
        ClientSession {
            http,
            base_url: self.inner.base_url.clone(),
        }
    }

    async fn probe(&self) -> Result<(reqwest::Client, HealthResponse)> {
        let limit = self.inner.config.connect_timeout;
        let http = reqwest::Client::builder()
            .connect_timeout(limit)
            .build()
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        let session = self.wrap(http.clone());
        let health = with_timeout("connect", limit, async move {
            session
                .get::<HealthResponse>(&["health"])
                .await
                .map_err(|e| ProtocolError::Connection(e.to_string()))
        })
        .await?;
        Ok((http, health))
    }

    /// Run `op` on a connected session under a deadline. Transport failures
    /// drop the connection so the next call reconnects.
    async fn guarded<T, F, Fut>(&self, operation: &'static str, limit: Duration, op: F) -> Result<T>
    where
        F: FnOnce(ClientSession) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let session = self.session().await?;
        let outcome = with_timeout(operation, limit, op(session)).await;
        if let Err(e) = &outcome {
            if e.is_transport() {
                self.mark_disconnected(e).await;
            }
        }
        outcome
    }

    async fn mark_disconnected(&self, cause: &ProtocolError) {
        let mut state = self.inner.state.lock().await;
        if matches!(*state, ConnectionState::Connected(_)) {
            warn!(url = %self.inner.base_url, error = %cause, "Lost tool server connection");
        }
        *state = ConnectionState::Disconnected;
    }
}

async fn with_timeout<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ProtocolError::Timeout {
            operation,
            seconds: limit.as_secs(),
        })?
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    Err(ProtocolError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Chunked body → frames, buffering partial lines across chunks
fn decode_frames(
    response: reqwest::Response,
    idle: Duration,
    client: ToolClient,
) -> BoxStream<'static, StreamFrame> {
    let body = response.bytes_stream().boxed();

    stream::unfold(Some((body, SseDecoder::new())), move |state| {
        let client = client.clone();
        async move {
            let Some((mut body, mut decoder)) = state else {
                return None;
            };
            loop {
                match tokio::time::timeout(idle, body.next()).await {
                    Ok(Some(Ok(chunk))) => {
                        let frames = decoder.feed(&chunk);
                        if !frames.is_empty() {
                            return Some((frames, Some((body, decoder))));
                        }
                    }
                    Ok(None) => return decoder.finish().map(|frame| (vec![frame], None)),
                    Ok(Some(Err(e))) => {
                        client.mark_disconnected(&ProtocolError::Http(e)).await;
                        return None;
                    }
                    Err(_) => {
                        warn!(seconds = idle.as_secs(), "Event stream went silent; closing");
                        return None;
                    }
                }
            }
        }
    })
    .flat_map(stream::iter)
    .boxed()
}

#[async_trait]
impl RemoteToolSource for ToolClient {
    async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.try_list_tools().await.unwrap_or_else(|e| {
            warn!(error = %e, "Could not list remote tools");
            Vec::new()
        })
    }

    async fn call_tool(
        &self,
        name: &str,
        params: &ToolParams,
        session_id: Option<&str>,
    ) -> ToolCallResult {
        match self.try_call_tool(name, params, session_id).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %name, error = %e, "Remote tool call failed");
                ToolCallResult::failure(e.to_string()).with_tool_name(name)
            }
        }
    }

    fn stream_tool_call(
        &self,
        name: &str,
        params: &ToolParams,
        session_id: Option<&str>,
    ) -> RemoteEventStream {
        let client = self.clone();
        let name = name.to_string();
        let request = CallToolRequest {
            parameters: params.clone(),
            session_id: session_id.map(String::from),
        };

        stream::once(async move {
            match client.try_stream_frames(&name, &request).await {
                Ok(frames) => frames.filter_map(|f| future::ready(f.into_remote_event())).boxed(),
                // The server answered but refused: surface it as a terminal error
                Err(ProtocolError::Status { message, .. }) => {
                    stream::once(future::ready(RemoteEvent::Error(message))).boxed()
                }
                Err(e) => {
                    warn!(tool = %name, error = %e, "Could not open tool stream");
                    stream::empty().boxed()
                }
            }
        })
        .flatten()
        .scan(false, |finished, event| {
            if *finished {
                return future::ready(None);
            }
            *finished = event.is_terminal();
            future::ready(Some(event))
        })
        .boxed()
    }

    async fn create_session(&self, context: &ConversationContext) -> Option<String> {
        match self.try_create_session(context).await {
            Ok(id) => Some(id),
            Err(e) => {
                debug!(error = %e, "Remote session not created");
                None
            }
        }
    }

    async fn delete_session(&self, session_id: &str) -> bool {
        self.try_delete_session(session_id).await.unwrap_or_else(|e| {
            debug!(session_id = %session_id, error = %e, "Remote session not deleted");
            false
        })
    }
}
