//! Thought Events
//!
//! Observable steps of a reasoning run, delivered to callers in order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::{ToolCallResult, ToolParams};

/// One step of a reasoning run
#[derive(Clone, Debug, PartialEq)]
pub enum ThoughtEvent {
    Thinking {
        content: String,
        confidence: Option<f64>,
    },
    ToolCall {
        tool_name: String,
        parameters: ToolParams,
    },
    ToolResult {
        tool_name: String,
        result: ToolCallResult,
    },
    FinalAnswer {
        content: String,
        confidence: Option<f64>,
    },
    Error {
        content: String,
    },
}

impl ThoughtEvent {
    /// Wire name of the event kind
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::FinalAnswer { .. } => "final_answer",
            Self::Error { .. } => "error",
        }
    }

    /// No further events follow a terminal event
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::FinalAnswer { .. } | Self::Error { .. })
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    /// Flatten into the caller-facing record
    pub fn to_record(&self) -> EventRecord {
        let mut record = EventRecord {
            event_type: self.kind().to_string(),
            content: String::new(),
            tool_name: None,
            parameters: None,
            result: None,
            confidence: None,
        };

        match self {
            Self::Thinking { content, confidence } | Self::FinalAnswer { content, confidence } => {
                record.content.clone_from(content);
                record.confidence = *confidence;
            }
            Self::ToolCall {
                tool_name,
                parameters,
            } => {
                record.content = format!("Calling tool: {tool_name}");
                record.tool_name = Some(tool_name.clone());
                record.parameters = Some(Value::Object(parameters.clone()));
            }
            Self::ToolResult { tool_name, result } => {
                record.content = match result.error_message() {
                    None if result.success => format!("Tool {tool_name} completed"),
                    Some(err) => format!("Tool {tool_name} failed: {err}"),
                    None => format!("Tool {tool_name} failed"),
                };
                record.tool_name = Some(tool_name.clone());
                record.result = serde_json::to_value(result).ok();
            }
            Self::Error { content } => record.content.clone_from(content),
        }

        record
    }
}

/// Serializable form of a [`ThoughtEvent`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub event_type: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl From<&ThoughtEvent> for EventRecord {
    fn from(event: &ThoughtEvent) -> Self {
        event.to_record()
    }
}
