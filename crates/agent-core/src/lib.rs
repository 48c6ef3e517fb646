//! # agent-core
//!
//! Tool model, tool registry and the think → decide → act reasoning engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                            Agent                              │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐   │
//! │  │  Reasoning  │───│ ToolRegistry │   │   LlmProvider    │   │
//! │  │    Loop     │   │   (local)    │   │   (Strategy)     │   │
//! │  └──────┬──────┘   └──────────────┘   └──────────────────┘   │
//! │         │          ┌──────────────────┐                       │
//! │         └──────────│ RemoteToolSource │  (HTTP tool server)   │
//! │                    └──────────────────┘                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Runs report progress as an ordered stream of [`ThoughtEvent`]s.

pub mod context;
pub mod decision;
pub mod error;
pub mod event;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod reasoning;
pub mod registry;
pub mod remote;
pub mod tool;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use context::ConversationContext;
pub use decision::{Action, Decision, FINAL_ANSWER_TOOL, parse_decision};
pub use error::{AgentError, Result};
pub use event::{EventRecord, ThoughtEvent};
pub use message::{ChatEntry, Message, Role};
pub use prompt::PromptProfile;
pub use provider::{GenerationOptions, LlmProvider};
pub use reasoning::{Agent, AgentBuilder, AgentConfig, RunHandle, RunOutcome, RunRequest};
pub use registry::ToolRegistry;
pub use remote::{RemoteEvent, RemoteEventStream, RemoteToolSource};
pub use tool::{
    Tool, ToolCallResult, ToolDefinition, ToolParameter, ToolParameterType, ToolParams,
    ToolParamsExt,
};
