//! Agent HTTP Server
//!
//! Serves the built-in tools over the tool protocol and exposes the
//! reasoning engine as an ask API (buffered and server-sent events).

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{Agent, LlmProvider, RemoteToolSource};
use agent_protocol::{ServerState, ToolClient};
use agent_runtime::OllamaProvider;

use crate::config::ServerConfig;
use crate::handlers::{ask_handler, ask_stream_handler, health_check, list_models};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env()?;

    // Initialize LLM provider
    let provider = Arc::new(OllamaProvider::from_config(config.ollama.clone()));
    match provider.health_check().await {
        Ok(true) => {
            tracing::info!(model = %config.ollama.model, "Connected to Ollama");
            if let Ok(models) = provider.list_models().await {
                for model in models {
                    tracing::info!("  Model: {}", model);
                }
            }
        }
        Ok(false) | Err(_) => {
            tracing::warn!("Ollama not available - reasoning runs will fail");
            tracing::warn!("  Make sure Ollama is running: ollama serve");
        }
    }

    // Initialize tools
    let tools = Arc::new(agent_tools::builtin_registry()?);
    tracing::info!("Registered {} tools:", tools.len());
    for name in tools.names() {
        tracing::info!("  • {}", name);
    }

    // Remote tool catalog (optional)
    let remote: Option<Arc<dyn RemoteToolSource>> = match config.client_config() {
        Some(client_config) => {
            let client = ToolClient::new(client_config);
            if let Err(e) = client.connect().await {
                tracing::warn!(url = %client.base_url(), error = %e, "Remote tools unavailable; will retry on demand");
            }
            Some(Arc::new(client))
        }
        None => None,
    };

    let agent = Agent::new(provider.clone(), tools.clone(), remote, config.agent_config());
    let app = build_router(AppState {
        agent: Arc::new(agent),
        provider,
        tools,
    });

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Agent server running on http://{}", config.bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /api/health         - Service health");
    tracing::info!("  GET    /api/models         - List available models");
    tracing::info!("  POST   /api/ask            - Ask a question");
    tracing::info!("  POST   /api/ask/stream     - Ask, streaming reasoning events");
    tracing::info!("  GET    /health             - Tool protocol health");
    tracing::info!("  GET    /tools              - Tool catalog");
    tracing::info!("  POST   /tools/{{name}}/call   - Run a tool");
    tracing::info!("  POST   /tools/{{name}}/stream - Run a tool, streaming");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        signal.cancel();
    });

    agent_protocol::serve(listener, app, shutdown).await?;
    Ok(())
}

/// Ask API plus the tool protocol for the same registry
pub fn build_router(state: AppState) -> Router {
    let protocol = agent_protocol::router(ServerState::new(state.tools.clone()));

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/models", get(list_models))
        .route("/api/ask", post(ask_handler))
        .route("/api/ask/stream", post(ask_stream_handler))
        .with_state(state)
        .merge(protocol)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
