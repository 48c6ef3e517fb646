//! Conversation Context
//!
//! Per-run mutable state: the question, optional document, append-only
//! history, iteration counters and the completion latch.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{ChatEntry, Message, Role};
use crate::tool::ToolDefinition;

const fn default_max_iterations() -> usize {
    10
}

/// State for one agent run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default = "Uuid::new_v4")]
    pub session_id: Uuid,

    pub user_query: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_file_path: Option<String>,

    #[serde(default)]
    chat_history: Vec<ChatEntry>,

    /// Merged catalog visible to this run
    #[serde(default)]
    pub available_tools: Vec<ToolDefinition>,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default)]
    pub current_iteration: usize,

    #[serde(default)]
    is_completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    final_answer: Option<String>,
}

impl ConversationContext {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_query: user_query.into(),
            document_content: None,
            document_type: None,
            document_file_path: None,
            chat_history: Vec::new(),
            available_tools: Vec::new(),
            max_iterations: default_max_iterations(),
            current_iteration: 0,
            is_completed: false,
            final_answer: None,
        }
    }

    #[must_use]
    pub fn with_document(
        mut self,
        content: Option<String>,
        document_type: Option<String>,
        file_path: Option<String>,
    ) -> Self {
        self.document_content = content;
        self.document_type = document_type;
        self.document_file_path = file_path;
        self
    }

    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Append a history entry. Existing entries are never modified.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.chat_history.push(Message::new(role, content));
    }

    pub fn history(&self) -> &[ChatEntry] {
        &self.chat_history
    }

    /// The last `limit` history entries, oldest first
    pub fn recent_history(&self, limit: usize) -> &[ChatEntry] {
        let start = self.chat_history.len().saturating_sub(limit);
        &self.chat_history[start..]
    }

    /// Start the next loop pass
    pub const fn advance(&mut self) {
        self.current_iteration += 1;
    }

    pub const fn iterations_remaining(&self) -> bool {
        self.current_iteration < self.max_iterations
    }

    /// Mark the run completed with `answer`.
    ///
    /// Returns `false`, leaving the stored answer untouched, when the
    /// context was already completed.
    pub fn complete(&mut self, answer: impl Into<String>) -> bool {
        if self.is_completed {
            return false;
        }
        self.is_completed = true;
        self.final_answer = Some(answer.into());
        true
    }

    pub const fn is_completed(&self) -> bool {
        self.is_completed
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }

    pub fn has_document(&self) -> bool {
        self.document_content.as_deref().is_some_and(|c| !c.is_empty())
    }
}
