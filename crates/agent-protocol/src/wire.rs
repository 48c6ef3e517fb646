//! Wire Types
//!
//! JSON bodies exchanged between the tool server and its clients.

use agent_core::{RemoteEvent, ToolCallResult, ToolDefinition, ToolParameter, ToolParameterType, ToolParams};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

/// Stream frame kinds
pub mod event_type {
    pub const TOOL_CALL: &str = "tool_call";
    pub const TOOL_CODE: &str = "tool_code";
    pub const TEXT_DELTA: &str = "text_delta";
    pub const TOOL_RESULT: &str = "tool_result";
    pub const ERROR: &str = "error";
}

/// Body of `POST /tools/{name}/call` and `/stream`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolRequest {
    #[serde(default)]
    pub parameters: ToolParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// One server-sent event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl StreamFrame {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn started(tool_name: &str, parameters: &ToolParams) -> Self {
        Self::new(
            event_type::TOOL_CALL,
            json!({
                "tool_name": tool_name,
                "parameters": parameters,
                "status": "started",
            }),
        )
    }

    pub fn result(result: &ToolCallResult) -> Self {
        Self::new(
            event_type::TOOL_RESULT,
            serde_json::to_value(result).unwrap_or_else(|e| json!({"success": false, "error": e.to_string()})),
        )
    }

    pub fn error(tool_name: &str, error: impl Into<String>) -> Self {
        Self::new(
            event_type::ERROR,
            json!({ "error": error.into(), "tool_name": tool_name }),
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type == event_type::TOOL_RESULT || self.event_type == event_type::ERROR
    }

    /// Map to the engine-facing event; unknown kinds are dropped
    pub fn into_remote_event(self) -> Option<RemoteEvent> {
        let data = self.data;
        let text = |key: &str| data.get(key).and_then(Value::as_str).unwrap_or_default().to_string();

        match self.event_type.as_str() {
            event_type::TOOL_CALL => Some(RemoteEvent::Started {
                tool_name: text("tool_name"),
                parameters: data.get("parameters").cloned().unwrap_or(Value::Null),
            }),
            event_type::TOOL_CODE => Some(RemoteEvent::Code {
                language: text("language"),
                code: text("code"),
            }),
            event_type::TEXT_DELTA => Some(RemoteEvent::TextDelta(text("delta"))),
            event_type::TOOL_RESULT => Some(RemoteEvent::Result(result_from_wire(data))),
            event_type::ERROR => {
                let message = data
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                Some(RemoteEvent::Error(message))
            }
            other => {
                warn!(event_type = %other, "Ignoring unknown stream frame");
                None
            }
        }
    }
}

/// Parse a tool result, treating a bare payload as a successful result
pub fn result_from_wire(data: Value) -> ToolCallResult {
    let is_result_shape = data.get("success").is_some_and(Value::is_boolean);
    if is_result_shape {
        match serde_json::from_value::<ToolCallResult>(data.clone()) {
            Ok(result) => return result,
            Err(e) => warn!(error = %e, "Malformed tool result; treating as payload"),
        }
    }
    ToolCallResult::success(agent_core::tool::normalize_output(data))
}

/// `GET /health`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub tool_count: usize,
    pub active_sessions: usize,
}

/// `GET /tools`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolList {
    pub tools: Vec<Value>,
}

/// `POST /sessions`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCreated {
    pub session_id: String,
    pub status: String,
}

/// `DELETE /sessions/{id}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Error body for non-2xx responses
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Build a [`ToolDefinition`] from a catalog entry.
///
/// Accepts both the native shape (`parameters` keyed by name) and a
/// JSON-Schema shape (`input_schema` / `inputSchema` with `properties` and
/// `required`). Type names outside the known set map to `string`. Entries
/// without a name, or that fail validation, yield `None`.
pub fn definition_from_wire(value: &Value) -> Option<ToolDefinition> {
    let name = value.get("name").and_then(Value::as_str).map(str::trim).filter(|n| !n.is_empty())?;
    let description = value.get("description").and_then(Value::as_str).unwrap_or_default();
    let mut definition = ToolDefinition::new(name, description);

    let schema = value.get("input_schema").or_else(|| value.get("inputSchema"));
    let (properties, mut required) = match (value.get("parameters"), schema) {
        (Some(Value::Object(params)), _) => (params.clone(), string_list(value.get("required_parameters"))),
        (_, Some(schema)) => (
            schema.get("properties").and_then(Value::as_object).cloned().unwrap_or_default(),
            string_list(schema.get("required")),
        ),
        _ => (Map::new(), Vec::new()),
    };

    for (param_name, spec) in &properties {
        let mut parameter = ToolParameter::new(
            ToolParameterType::from_wire(spec.get("type").and_then(Value::as_str).unwrap_or("string")),
            spec.get("description").and_then(Value::as_str).unwrap_or_default(),
        );
        parameter.default = spec.get("default").filter(|d| !d.is_null()).cloned();
        parameter.enum_values = spec
            .get("enum")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(|v| v.as_str().map(String::from)).collect());

        let flagged = spec.get("required").and_then(Value::as_bool).unwrap_or(false);
        if flagged && !required.contains(param_name) {
            required.push(param_name.clone());
        }
        parameter.required = flagged || required.contains(param_name);
        definition.parameters.insert(param_name.clone(), parameter);
    }
    definition.required_parameters = required;

    match definition.validate() {
        Ok(()) => Some(definition),
        Err(e) => {
            warn!(tool = %name, error = %e, "Dropping invalid remote tool definition");
            None
        }
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_definition_round_trips() {
        let original = ToolDefinition::new("search", "Search")
            .param("query", ToolParameter::string("Terms").required())
            .param("limit", ToolParameter::integer("Max").with_default(3));
        let wire = serde_json::to_value(&original).unwrap();
        assert_eq!(definition_from_wire(&wire), Some(original));
    }

    #[test]
    fn test_schema_definition_maps_unknown_types() {
        let wire = json!({
            "name": "lookup",
            "description": "Look something up",
            "input_schema": {
                "type": "object",
                "properties": {
                    "id": {"type": "uuid", "description": "Identifier"},
                    "verbose": {"type": "boolean", "default": false}
                },
                "required": ["id"]
            }
        });
        let def = definition_from_wire(&wire).unwrap();
        assert_eq!(def.parameters["id"].param_type, ToolParameterType::String);
        assert!(def.parameters["id"].required);
        assert_eq!(def.required_parameters, vec!["id".to_string()]);
        assert_eq!(def.parameters["verbose"].default, Some(json!(false)));
    }

    #[test]
    fn test_invalid_definitions_are_dropped() {
        assert!(definition_from_wire(&json!({"description": "no name"})).is_none());
        let dangling = json!({"name": "x", "parameters": {}, "required_parameters": ["ghost"]});
        assert!(definition_from_wire(&dangling).is_none());
    }

    #[test]
    fn test_frames_map_to_remote_events() {
        let started = StreamFrame::started("calc", &ToolParams::new()).into_remote_event();
        assert!(matches!(started, Some(RemoteEvent::Started { tool_name, .. }) if tool_name == "calc"));

        let failed = StreamFrame::error("calc", "unknown tool: calc").into_remote_event();
        assert_eq!(failed, Some(RemoteEvent::Error("unknown tool: calc".into())));

        let ok = StreamFrame::result(&ToolCallResult::success(json!({"output": 4})));
        assert!(ok.is_terminal());
        assert_eq!(
            ok.into_remote_event(),
            Some(RemoteEvent::Result(ToolCallResult::success(json!({"output": 4}))))
        );

        let delta = StreamFrame::new(event_type::TEXT_DELTA, json!({"delta": "par"}));
        assert_eq!(delta.into_remote_event(), Some(RemoteEvent::TextDelta("par".into())));
        assert!(StreamFrame::new("heartbeat", Value::Null).into_remote_event().is_none());
    }

    #[test]
    fn test_bare_payload_result() {
        let result = result_from_wire(json!({"text": "hello"}));
        assert!(result.success);
        assert_eq!(result.result, Some(json!({"text": "hello"})));
        assert_eq!(result_from_wire(json!(5)).result, Some(json!({"output": 5})));
    }
}
