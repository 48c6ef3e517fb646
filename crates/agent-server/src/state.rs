//! Application State

use std::sync::Arc;

use agent_core::{Agent, LlmProvider, ToolRegistry};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Reasoning engine shared by every request
    pub agent: Arc<Agent>,

    /// LLM provider (Ollama, etc.)
    pub provider: Arc<dyn LlmProvider>,

    /// Locally registered tools, also served over the tool protocol
    pub tools: Arc<ToolRegistry>,
}
