//! HTTP Handlers

use std::convert::Infallible;
use std::time::Duration;

use agent_core::{EventRecord, RunRequest, ThoughtEvent};
use agent_protocol::ErrorResponse;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub llm_provider: String,
    pub llm_connected: bool,
    pub tool_count: usize,
    pub remote_tools: bool,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub document_content: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub document_file_path: Option<String>,
}

impl AskRequest {
    fn into_run_request(self) -> Result<RunRequest, ApiError> {
        let question = self.question.trim();
        if question.is_empty() {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "question must not be empty".into(),
                    code: "INVALID_REQUEST".into(),
                }),
            ));
        }
        Ok(RunRequest {
            query: question.to_string(),
            document_content: self.document_content,
            document_type: self.document_type,
            document_file_path: self.document_file_path,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub question: String,
    pub answer: String,
    pub events: Vec<EventRecord>,
    pub iterations_used: usize,
    pub tools_available: usize,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub provider: String,
    pub models: Vec<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Service health, including the completion backend
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let llm_connected = state.provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        llm_provider: state.provider.name().to_string(),
        llm_connected,
        tool_count: state.tools.len(),
        remote_tools: state.agent.has_remote(),
    })
}

/// Models offered by the completion backend
pub async fn list_models(State(state): State<AppState>) -> Result<Json<ModelsResponse>, ApiError> {
    let models = state.provider.list_models().await.map_err(|e| {
        warn!(error = %e, "Could not list models");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.user_message(),
                code: "PROVIDER_UNAVAILABLE".into(),
            }),
        )
    })?;

    Ok(Json(ModelsResponse {
        provider: state.provider.name().to_string(),
        models,
    }))
}

/// Run the agent to completion and return every event
pub async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let request = payload.into_run_request()?;
    let question = request.query.clone();
    info!(question = %question, "Ask");

    let outcome = state.agent.run_to_completion(request).await;
    let answer = match outcome.events.last() {
        Some(ThoughtEvent::FinalAnswer { content, .. }) => content.clone(),
        Some(ThoughtEvent::Error { content }) => {
            return Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: content.clone(),
                    code: "AGENT_ERROR".into(),
                }),
            ));
        }
        _ => String::new(),
    };

    Ok(Json(AskResponse {
        question,
        answer,
        events: outcome.events.iter().map(EventRecord::from).collect(),
        iterations_used: outcome.context.current_iteration,
        tools_available: outcome.context.available_tools.len(),
        session_id: outcome.context.session_id.to_string(),
    }))
}

/// Stream reasoning events as they happen. Closing the connection cancels
/// the run.
pub async fn ask_stream_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request = payload.into_run_request()?;
    info!(question = %request.query, "Ask (streaming)");

    let events = state.agent.stream(request).map(|event| {
        let record = EventRecord::from(&event);
        let data = serde_json::to_string(&record).unwrap_or_else(|_| "{}".into());
        Ok(Event::default().event(event.kind()).data(data))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agent_core::mock::ScriptedProvider;
    use agent_core::{Agent, AgentConfig};
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, header},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    fn app(replies: Vec<String>) -> Router {
        let provider = Arc::new(ScriptedProvider::new(replies));
        let tools = Arc::new(agent_tools::builtin_registry().unwrap());
        let agent = Agent::new(provider.clone(), tools.clone(), None, AgentConfig::default());
        crate::build_router(AppState {
            agent: Arc::new(agent),
            provider,
            tools,
        })
    }

    fn answer_script(answer: &str) -> Vec<String> {
        vec![
            "I already know this".into(),
            json!({"action": {"type": "tool_call", "tool_name": "final_answer", "parameters": {"answer": answer}}})
                .to_string(),
        ]
    }

    fn post(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_ask_returns_answer_and_events() {
        let response = app(answer_script("4"))
            .oneshot(post("/api/ask", &json!({"question": "What is 2+2?"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body["answer"], "4");
        assert_eq!(body["iterations_used"], 1);
        assert_eq!(body["tools_available"], 5);
        let kinds: Vec<&str> = body["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["thinking", "tool_call", "final_answer"]);
    }

    #[tokio::test]
    async fn test_blank_question_is_rejected() {
        let response = app(Vec::new())
            .oneshot(post("/api/ask", &json!({"question": "   "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ask_stream_emits_named_events() {
        let response = app(answer_script("done"))
            .oneshot(post("/api/ask/stream", &json!({"question": "Finish"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&body);
        let thinking = text.find("event: thinking").unwrap();
        let final_answer = text.find("event: final_answer").unwrap();
        assert!(thinking < final_answer);
        assert!(text.contains(r#""content":"done""#));
    }

    #[tokio::test]
    async fn test_tool_protocol_is_served_alongside() {
        let response = app(Vec::new())
            .oneshot(Request::get("/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body["tools"].as_array().unwrap().len(), 4);
    }
}
