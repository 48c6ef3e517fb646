//! Decision Parsing
//!
//! Turns the free-form text of a decide step into a tool invocation. Parsing
//! is total: anything that isn't a well-formed `tool_call` becomes a
//! [`Decision::Fallback`].

use serde_json::Value;

use crate::tool::{ToolParams, json_type_name};

/// Reserved pseudo-tool that ends a run
pub const FINAL_ANSWER_TOOL: &str = "final_answer";

/// Answer used when a decision can't be understood
pub const FALLBACK_ANSWER: &str =
    "Sorry, I ran into a problem while working on this request and cannot continue.";

/// A tool invocation chosen by the model
#[derive(Clone, Debug, PartialEq)]
pub struct Action {
    pub tool_name: String,
    pub parameters: ToolParams,
}

impl Action {
    pub fn new(tool_name: impl Into<String>, parameters: ToolParams) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
        }
    }

    /// A `final_answer` call carrying `answer`
    pub fn final_answer(answer: impl Into<String>) -> Self {
        let mut parameters = ToolParams::new();
        parameters.insert("answer".into(), Value::String(answer.into()));
        Self::new(FINAL_ANSWER_TOOL, parameters)
    }

    pub fn is_final_answer(&self) -> bool {
        self.tool_name == FINAL_ANSWER_TOOL
    }

    /// The `answer` argument, stringified if the model sent a non-string
    pub fn answer(&self) -> Option<String> {
        match self.parameters.get("answer")? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Outcome of parsing a decide step
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Action(Action),
    Fallback { reason: String },
}

impl Decision {
    /// The action to perform; fallbacks become a final apology
    pub fn into_action(self) -> Action {
        match self {
            Self::Action(action) => action,
            Self::Fallback { .. } => Action::final_answer(FALLBACK_ANSWER),
        }
    }

    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Parse a decide-step response.
///
/// Accepts `{"action": {"type": "tool_call", ...}}` or the same object
/// without the wrapper, optionally surrounded by prose or code fences.
pub fn parse_decision(text: &str) -> Decision {
    match parse_action(text) {
        Ok(action) => Decision::Action(action),
        Err(reason) => Decision::Fallback { reason },
    }
}

fn parse_action(text: &str) -> Result<Action, String> {
    let candidate = extract_json(text);
    let value: Value =
        serde_json::from_str(&candidate).map_err(|e| format!("invalid JSON: {e}"))?;

    let Value::Object(mut root) = value else {
        return Err(format!("expected a JSON object, got {}", json_type_name(&value)));
    };

    let mut action = match root.remove("action") {
        Some(Value::Object(inner)) => inner,
        Some(other) => {
            return Err(format!("\"action\" must be an object, got {}", json_type_name(&other)));
        }
        None => root,
    };

    match action.get("type").and_then(Value::as_str) {
        Some("tool_call") => {}
        Some(other) => return Err(format!("unsupported action type \"{other}\"")),
        None => return Err("missing action type".into()),
    }

    let tool_name = match action.remove("tool_name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return Err("missing tool_name".into()),
    };

    let parameters = match action.remove("parameters") {
        None | Some(Value::Null) => ToolParams::new(),
        Some(Value::Object(params)) => params,
        Some(other) => {
            return Err(format!("parameters must be an object, got {}", json_type_name(&other)));
        }
    };

    Ok(Action::new(tool_name, parameters))
}

/// Slice from the first `{` to the last `}`; failing that, strip code fences
fn extract_json(text: &str) -> String {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            return text[start..=end].to_string();
        }
    }

    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.trim().to_string()
}
