//! Prompt templates for the think and decide steps.
//!
//! Two profiles exist: a general assistant and a document Q&A assistant that
//! embeds document metadata and a preview, and narrows the tool listing to
//! document and search tools.

use std::fmt::Write;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::context::ConversationContext;
use crate::decision::FINAL_ANSWER_TOOL;
use crate::error::AgentError;
use crate::message::{ChatEntry, truncate_chars};
use crate::tool::ToolDefinition;

/// History entries shown in the think prompt
pub const HISTORY_WINDOW: usize = 5;

/// Characters kept per history entry
pub const HISTORY_ENTRY_CHARS: usize = 200;

/// Characters of the document shown by the document Q&A profile
pub const DOCUMENT_PREVIEW_CHARS: usize = 1500;

const DECISION_FORMAT: &str = r#"Respond with exactly one JSON object in this format and nothing else (no prose, no markdown):
{
  "action": {
    "type": "tool_call",
    "tool_name": "<tool name>",
    "parameters": { "<parameter>": "<value>" }
  }
}"#;

/// Prompt flavour used by the reasoning engine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptProfile {
    #[default]
    General,
    DocumentQa,
}

impl FromStr for PromptProfile {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Self::General),
            "document_qa" | "document-qa" | "documentqa" => Ok(Self::DocumentQa),
            other => Err(AgentError::Config(format!("unknown prompt profile: {other}"))),
        }
    }
}

impl PromptProfile {
    /// Tools this profile lists in prompts
    pub fn visible_tools<'a>(&self, catalog: &'a [ToolDefinition]) -> Vec<&'a ToolDefinition> {
        match self {
            Self::General => catalog.iter().collect(),
            Self::DocumentQa => catalog
                .iter()
                .filter(|tool| {
                    let name = tool.name.to_ascii_lowercase();
                    name == FINAL_ANSWER_TOOL || name.contains("document") || name.contains("search")
                })
                .collect(),
        }
    }

    /// Prompt for the free-text think step
    pub fn think_prompt(&self, ctx: &ConversationContext, catalog: &[ToolDefinition]) -> String {
        let tools = describe_tools(self.visible_tools(catalog));
        let history = format_history(ctx.recent_history(HISTORY_WINDOW));
        let mut prompt = String::new();

        match self {
            Self::General => {
                prompt.push_str(
                    "You are an expert assistant. You solve the user's problem by calling tools.\n\n",
                );
                let _ = writeln!(prompt, "Current situation:");
                let _ = writeln!(prompt, "- User question: {}", ctx.user_query);
            }
            Self::DocumentQa => {
                prompt.push_str(
                    "You are a document question-answering assistant. You analyse the document and use tools to answer the user's question.\n\n",
                );
                let _ = writeln!(prompt, "User question: {}\n", ctx.user_query);
                write_document_section(&mut prompt, ctx);
                let _ = writeln!(prompt, "Current state:");
            }
        }

        let _ = writeln!(
            prompt,
            "- Iteration: {}/{}",
            ctx.current_iteration, ctx.max_iterations
        );
        let _ = writeln!(prompt, "- Conversation history:\n{history}\n");
        let _ = writeln!(prompt, "Available tools:\n{tools}\n");

        match self {
            Self::General => prompt.push_str(
                "Think out loud about your plan. Cover:\n\
                 1. What the user is asking and why.\n\
                 2. Whether the information gathered so far is sufficient.\n\
                 3. If not, which tool to call next, why, and with which parameters.\n\
                 4. If it is, how you will answer, by calling `final_answer`.\n\n",
            ),
            Self::DocumentQa => prompt.push_str(
                "Think out loud about your plan. Cover:\n\
                 1. Whether the question needs the document text. If only a file path is known, call `document_parser` first.\n\
                 2. Whether the information gathered so far is sufficient.\n\
                 3. If not, which document tool to call next and with which parameters.\n\
                 4. If it is, how you will answer, by calling `final_answer`.\n\n",
            ),
        }
        prompt.push_str("Your reasoning (plain text):");
        prompt
    }

    /// Prompt for the JSON decide step
    pub fn decide_prompt(&self, thought: &str, catalog: &[ToolDefinition]) -> String {
        let tools = describe_tools(self.visible_tools(catalog));
        let mut prompt = String::from(
            "You are a decision maker. Based on the reasoning below, choose one tool to execute.\n\n",
        );
        let _ = writeln!(prompt, "Reasoning:\n---\n{thought}\n---\n");
        let _ = writeln!(prompt, "Available tools:\n{tools}\n");
        let _ = writeln!(prompt, "{DECISION_FORMAT}\n");
        prompt.push_str(
            "If the reasoning shows the information is sufficient, call `final_answer`.\n\nYour JSON decision:",
        );
        prompt
    }
}

fn write_document_section(prompt: &mut String, ctx: &ConversationContext) {
    let content = ctx.document_content.as_deref().unwrap_or_default();
    let preview = truncate_chars(content, DOCUMENT_PREVIEW_CHARS);

    let _ = writeln!(prompt, "Document:");
    let _ = writeln!(
        prompt,
        "- Type: {}",
        ctx.document_type.as_deref().unwrap_or("unknown")
    );
    let _ = writeln!(prompt, "- Length: {} characters", content.chars().count());
    let _ = writeln!(
        prompt,
        "- Content provided: {}",
        if ctx.has_document() { "yes" } else { "no" }
    );
    let _ = writeln!(
        prompt,
        "- File path: {}\n",
        ctx.document_file_path.as_deref().unwrap_or("(not provided)")
    );
    let _ = writeln!(
        prompt,
        "Document preview (first {DOCUMENT_PREVIEW_CHARS} characters):\n{}\n",
        if preview.trim().is_empty() { "(none)" } else { preview.trim() }
    );
}

/// One line per tool, with its parameters underneath
pub fn describe_tools<'a>(tools: impl IntoIterator<Item = &'a ToolDefinition>) -> String {
    let mut out = String::new();
    for tool in tools {
        let _ = writeln!(out, "- {}: {}", tool.name, tool.description);
        for (name, param) in &tool.parameters {
            let required = if tool.is_required(name) { ", required" } else { "" };
            let _ = writeln!(
                out,
                "  - `{name}` ({}{required}): {}",
                param.param_type, param.description
            );
        }
    }

    if out.is_empty() {
        "(no tools available)".into()
    } else {
        out.trim_end().to_string()
    }
}

/// `role: content` lines, each truncated
pub fn format_history(entries: &[ChatEntry]) -> String {
    if entries.is_empty() {
        return "(no history yet)".into();
    }
    entries
        .iter()
        .map(|entry| format!("{}: {}", entry.role, entry.preview(HISTORY_ENTRY_CHARS)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::tool::ToolParameter;

    fn catalog() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new("calculate", "Evaluate arithmetic")
                .param("expression", ToolParameter::string("Expression").required()),
            ToolDefinition::new("document_search", "Search the document")
                .param("query", ToolParameter::string("Search terms").required()),
            ToolDefinition::new(FINAL_ANSWER_TOOL, "Give the final answer")
                .param("answer", ToolParameter::string("Answer text").required()),
        ]
    }

    #[test]
    fn test_profile_from_str() {
        assert_eq!("document_qa".parse::<PromptProfile>().unwrap(), PromptProfile::DocumentQa);
        assert_eq!("General".parse::<PromptProfile>().unwrap(), PromptProfile::General);
        assert!("chatty".parse::<PromptProfile>().is_err());
    }

    #[test]
    fn test_document_profile_filters_tools() {
        let catalog = catalog();
        let names: Vec<&str> = PromptProfile::DocumentQa
            .visible_tools(&catalog)
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["document_search", FINAL_ANSWER_TOOL]);
        assert_eq!(PromptProfile::General.visible_tools(&catalog).len(), 3);
    }

    #[test]
    fn test_history_is_windowed_and_truncated() {
        let mut ctx = ConversationContext::new("q");
        ctx.push(Role::User, "old");
        for _ in 0..HISTORY_WINDOW {
            ctx.push(Role::Tool, "x".repeat(500));
        }
        let rendered = format_history(ctx.recent_history(HISTORY_WINDOW));
        assert!(!rendered.contains("old"));
        assert_eq!(rendered.lines().count(), HISTORY_WINDOW);
        assert!(rendered.lines().all(|l| l.len() == "tool: ".len() + HISTORY_ENTRY_CHARS + 3));
    }

    #[test]
    fn test_document_prompt_has_preview() {
        let ctx = ConversationContext::new("What is the total?").with_document(
            Some("a".repeat(2000)),
            Some("txt".into()),
            Some("/tmp/report.txt".into()),
        );
        let prompt = PromptProfile::DocumentQa.think_prompt(&ctx, &catalog());
        assert!(prompt.contains("/tmp/report.txt"));
        assert!(prompt.contains(&format!("{}...", "a".repeat(DOCUMENT_PREVIEW_CHARS))));
        assert!(!prompt.contains(&"a".repeat(DOCUMENT_PREVIEW_CHARS + 1)));
        assert!(!prompt.contains("calculate"));
    }

    #[test]
    fn test_decide_prompt_embeds_thought() {
        let prompt = PromptProfile::General.decide_prompt("I should add numbers", &catalog());
        assert!(prompt.contains("I should add numbers"));
        assert!(prompt.contains("\"type\": \"tool_call\""));
        assert!(prompt.contains("`expression` (string, required)"));
    }
}
