//! Tool Model
//!
//! Typed description of callable capabilities: parameter types with an
//! explicit coercion table, tool definitions, call results and the `Tool`
//! trait handlers implement.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};

/// Arguments passed to a tool, keyed by parameter name
pub type ToolParams = serde_json::Map<String, Value>;

/// Strings that coerce to `true` for boolean parameters (case-insensitive)
const TRUTHY: [&str; 4] = ["true", "1", "yes", "on"];

/// Primitive type of a tool parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    /// Map a wire-level type name; unknown names fall back to `String`
    pub fn from_wire(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "number" | "float" | "double" => Self::Number,
            "integer" | "int" => Self::Integer,
            "boolean" | "bool" => Self::Boolean,
            "array" | "list" => Self::Array,
            "object" | "dict" => Self::Object,
            _ => Self::String,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Whether `value` already has this type (no coercion)
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    /// Coerce a non-null value into this type.
    ///
    /// Numeric strings become numbers, truthy strings become booleans and
    /// scalars are wrapped when an array is expected. Objects are never
    /// synthesized.
    pub fn coerce(self, value: Value) -> std::result::Result<Value, String> {
        match (self, value) {
            (Self::String, Value::String(s)) => Ok(Value::String(s)),
            (Self::String, other) => Ok(Value::String(other.to_string())),

            (Self::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Ok(Value::Number(n))
                } else {
                    integral(n.as_f64()).ok_or_else(|| format!("expected an integer, got {n}"))
                }
            }
            (Self::Integer, Value::String(s)) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .map(Value::from)
                    .ok()
                    .or_else(|| integral(trimmed.parse::<f64>().ok()))
                    .ok_or_else(|| format!("expected an integer, got \"{s}\""))
            }

            (Self::Number, Value::Number(n)) => Ok(Value::Number(n)),
            (Self::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("expected a number, got \"{s}\"")),

            (Self::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (Self::Boolean, Value::String(s)) => Ok(Value::Bool(is_truthy(&s))),
            (Self::Boolean, Value::Number(n)) => Ok(Value::Bool(is_truthy(&n.to_string()))),

            (Self::Array, Value::Array(items)) => Ok(Value::Array(items)),
            (Self::Array, other) => Ok(Value::Array(vec![other])),

            (Self::Object, Value::Object(map)) => Ok(Value::Object(map)),

            (expected, other) => Err(format!(
                "expected {}, got {}",
                expected.as_str(),
                json_type_name(&other)
            )),
        }
    }
}

impl std::fmt::Display for ToolParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_truthy(s: &str) -> bool {
    let lowered = s.trim().to_ascii_lowercase();
    TRUTHY.contains(&lowered.as_str())
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn integral(value: Option<f64>) -> Option<Value> {
    let f = value?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

pub(crate) const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parameter definition for a tool
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    /// Declared type
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,

    /// Human-readable description (shown to the LLM)
    #[serde(default)]
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Allowed string values
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl ToolParameter {
    pub fn new(param_type: ToolParameterType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            description: description.into(),
            required: false,
            default: None,
            enum_values: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::new(ToolParameterType::String, description)
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self::new(ToolParameterType::Number, description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::new(ToolParameterType::Integer, description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::new(ToolParameterType::Boolean, description)
    }

    pub fn array(description: impl Into<String>) -> Self {
        Self::new(ToolParameterType::Array, description)
    }

    pub fn object(description: impl Into<String>) -> Self {
        Self::new(ToolParameterType::Object, description)
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    #[must_use]
    pub fn with_enum<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Check that the default (if any) matches the declared type
    pub fn validate(&self, name: &str) -> Result<()> {
        match &self.default {
            Some(default) if !default.is_null() && !self.param_type.accepts(default) => {
                Err(AgentError::ToolValidation(format!(
                    "default for '{name}' is {} but the parameter is declared {}",
                    json_type_name(default),
                    self.param_type
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Tool definition (name, description, typed parameters)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool identifier within a catalog
    pub name: String,

    /// Human-readable description (shown to the LLM)
    #[serde(default)]
    pub description: String,

    /// Parameter definitions, in declaration order
    #[serde(default)]
    pub parameters: IndexMap<String, ToolParameter>,

    /// Names of required parameters, each present in `parameters`
    #[serde(default)]
    pub required_parameters: Vec<String>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: IndexMap::new(),
            required_parameters: Vec::new(),
        }
    }

    /// Add a parameter, keeping `required_parameters` in sync
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, parameter: ToolParameter) -> Self {
        let name = name.into();
        if parameter.required && !self.required_parameters.contains(&name) {
            self.required_parameters.push(name.clone());
        }
        self.parameters.insert(name, parameter);
        self
    }

    /// Whether `name` must be supplied by the caller
    pub fn is_required(&self, name: &str) -> bool {
        self.required_parameters.iter().any(|r| r == name)
            || self.parameters.get(name).is_some_and(|p| p.required)
    }

    /// Names of all required parameters (list order, then flagged parameters)
    pub fn required_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.required_parameters.iter().map(String::as_str).collect();
        for (name, param) in &self.parameters {
            if param.required && !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }

    /// Check the catalog invariants of this definition
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AgentError::ToolValidation("tool name must not be empty".into()));
        }

        for required in &self.required_parameters {
            if !self.parameters.contains_key(required) {
                return Err(AgentError::ToolValidation(format!(
                    "tool '{}' requires undeclared parameter '{required}'",
                    self.name
                )));
            }
        }

        for (name, param) in &self.parameters {
            param.validate(name)?;
        }

        Ok(())
    }

    /// Render in the OpenAI function-calling shape
    pub fn to_openai_format(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .parameters
            .iter()
            .map(|(name, param)| {
                let mut prop = serde_json::json!({
                    "type": param.param_type.as_str(),
                    "description": param.description,
                });
                if let Some(values) = &param.enum_values {
                    prop["enum"] = serde_json::json!(values);
                }
                if let Some(default) = &param.default {
                    prop["default"] = default.clone();
                }
                (name.clone(), prop)
            })
            .collect();

        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": self.required_names(),
                }
            }
        })
    }
}

/// Outcome of a tool invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Whether execution succeeded
    pub success: bool,

    /// Structured payload (meaningful when `success`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error message (meaningful when `!success`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock execution time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,

    /// Tool that produced a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ToolCallResult {
    pub const fn success(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            execution_time: None,
            tool_name: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            execution_time: None,
            tool_name: None,
        }
    }

    #[must_use]
    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    #[must_use]
    pub const fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time = Some(elapsed.as_secs_f64());
        self
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Text folded into chat history. Falls back to the debug form if the
    /// payload can't be serialized.
    pub fn to_history_text(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Wrap any non-object return value as `{"output": value}`
pub fn normalize_output(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        other => serde_json::json!({ "output": other }),
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Definition advertised to the LLM and remote clients
    fn definition(&self) -> ToolDefinition;

    /// Execute with arguments already validated against the definition
    async fn execute(&self, params: &ToolParams) -> Result<Value>;
}

/// Adapter turning an async closure into a [`Tool`]
pub struct FnTool<F> {
    definition: ToolDefinition,
    handler: F,
}

impl<F> FnTool<F> {
    pub const fn new(definition: ToolDefinition, handler: F) -> Self {
        Self { definition, handler }
    }
}

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(ToolParams) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, params: &ToolParams) -> Result<Value> {
        (self.handler)(params.clone()).await
    }
}

/// Typed accessors for handler arguments
pub trait ToolParamsExt {
    fn str_param(&self, name: &str) -> Result<&str>;
    fn opt_str(&self, name: &str) -> Option<&str>;
    fn i64_or(&self, name: &str, default: i64) -> i64;
    fn bool_or(&self, name: &str, default: bool) -> bool;
}

impl ToolParamsExt for ToolParams {
    fn str_param(&self, name: &str) -> Result<&str> {
        self.opt_str(name)
            .ok_or_else(|| AgentError::ToolValidation(format!("missing required parameter: {name}")))
    }

    fn opt_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    fn i64_or(&self, name: &str, default: i64) -> i64 {
        self.get(name).and_then(Value::as_i64).unwrap_or(default)
    }

    fn bool_or(&self, name: &str, default: bool) -> bool {
        self.get(name).and_then(Value::as_bool).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_coercion() {
        let t = ToolParameterType::Integer;
        assert_eq!(t.coerce(json!("3")).unwrap(), json!(3));
        assert_eq!(t.coerce(json!(" 42 ")).unwrap(), json!(42));
        assert_eq!(t.coerce(json!(7.0)).unwrap(), json!(7));
        assert!(t.coerce(json!(3.5)).is_err());
        assert!(t.coerce(json!("three")).is_err());
        assert!(t.coerce(json!(true)).is_err());
    }

    #[test]
    fn test_number_and_boolean_coercion() {
        assert_eq!(ToolParameterType::Number.coerce(json!("2.5")).unwrap(), json!(2.5));
        assert!(ToolParameterType::Number.coerce(json!([1])).is_err());

        let b = ToolParameterType::Boolean;
        assert_eq!(b.coerce(json!("YES")).unwrap(), json!(true));
        assert_eq!(b.coerce(json!("on")).unwrap(), json!(true));
        assert_eq!(b.coerce(json!("nope")).unwrap(), json!(false));
        assert_eq!(b.coerce(json!(1)).unwrap(), json!(true));
        assert_eq!(b.coerce(json!(0)).unwrap(), json!(false));
        assert!(b.coerce(json!({"a": 1})).is_err());
    }

    #[test]
    fn test_array_object_string_coercion() {
        assert_eq!(ToolParameterType::Array.coerce(json!("x")).unwrap(), json!(["x"]));
        assert_eq!(ToolParameterType::Array.coerce(json!([1, 2])).unwrap(), json!([1, 2]));
        assert!(ToolParameterType::Object.coerce(json!("{}")).is_err());
        assert_eq!(ToolParameterType::String.coerce(json!(12)).unwrap(), json!("12"));
    }

    #[test]
    fn test_from_wire_defaults_to_string() {
        assert_eq!(ToolParameterType::from_wire("integer"), ToolParameterType::Integer);
        assert_eq!(ToolParameterType::from_wire("Boolean"), ToolParameterType::Boolean);
        assert_eq!(ToolParameterType::from_wire("uuid"), ToolParameterType::String);
    }

    #[test]
    fn test_definition_builder_tracks_required() {
        let def = ToolDefinition::new("echo", "Echo text")
            .param("text", ToolParameter::string("Text to echo").required())
            .param("times", ToolParameter::integer("Repeat count").with_default(1));

        assert_eq!(def.required_parameters, vec!["text".to_string()]);
        assert!(def.is_required("text"));
        assert!(!def.is_required("times"));
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_definition_invariants() {
        let mut def = ToolDefinition::new("bad", "");
        def.required_parameters.push("missing".into());
        assert!(def.validate().is_err());

        let def = ToolDefinition::new("bad_default", "")
            .param("count", ToolParameter::integer("n").with_default("ten"));
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_openai_format() {
        let def = ToolDefinition::new("search", "Search docs")
            .param("query", ToolParameter::string("Query").required())
            .param("mode", ToolParameter::string("Mode").with_enum(["fast", "deep"]));

        let rendered = def.to_openai_format();
        assert_eq!(rendered["function"]["name"], "search");
        assert_eq!(rendered["function"]["parameters"]["required"], json!(["query"]));
        assert_eq!(
            rendered["function"]["parameters"]["properties"]["mode"]["enum"],
            json!(["fast", "deep"])
        );
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output(json!("hi")), json!({"output": "hi"}));
        assert_eq!(normalize_output(json!({"a": 1})), json!({"a": 1}));
        assert_eq!(normalize_output(json!([1])), json!({"output": [1]}));
    }

    #[test]
    fn test_result_serialization_skips_empty_fields() {
        let ok = serde_json::to_value(ToolCallResult::success(json!({"output": 1}))).unwrap();
        assert_eq!(ok, json!({"success": true, "result": {"output": 1}}));

        let failed: ToolCallResult =
            serde_json::from_value(json!({"success": false, "error": "boom"})).unwrap();
        assert_eq!(failed.error_message(), Some("boom"));
    }
}
