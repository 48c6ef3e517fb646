//! Remote Tool Source
//!
//! Seam between the reasoning engine and an out-of-process tool catalog.
//! Implementations absorb their own transport failures: the engine only
//! ever sees definitions, results and events.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::context::ConversationContext;
use crate::tool::{ToolCallResult, ToolDefinition, ToolParams};

/// Incremental event of a streamed remote call
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteEvent {
    /// The server accepted the call
    Started { tool_name: String, parameters: Value },
    /// Code the tool is running (code-interpreter style tools)
    Code { language: String, code: String },
    /// Partial text output
    TextDelta(String),
    /// Terminal: the tool finished (successfully or not)
    Result(ToolCallResult),
    /// Terminal: the call could not be made
    Error(String),
}

impl RemoteEvent {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_) | Self::Error(_))
    }
}

pub type RemoteEventStream = BoxStream<'static, RemoteEvent>;

/// Out-of-process tool catalog
#[async_trait]
pub trait RemoteToolSource: Send + Sync {
    /// Definitions offered by the remote side; empty on failure
    async fn list_tools(&self) -> Vec<ToolDefinition>;

    /// Invoke a tool and wait for its result
    async fn call_tool(
        &self,
        name: &str,
        params: &ToolParams,
        session_id: Option<&str>,
    ) -> ToolCallResult;

    /// Invoke a tool, yielding progress events. Dropping the stream cancels
    /// the call.
    fn stream_tool_call(
        &self,
        name: &str,
        params: &ToolParams,
        session_id: Option<&str>,
    ) -> RemoteEventStream;

    /// Register a session on the remote side (best effort)
    async fn create_session(&self, _context: &ConversationContext) -> Option<String> {
        None
    }

    /// Drop a remote session (best effort)
    async fn delete_session(&self, _session_id: &str) -> bool {
        false
    }
}
