//! Tool Registry
//!
//! Name-keyed catalog of in-process tools. `safe_execute` is the single
//! entry point used by dispatch: it validates and coerces arguments, runs
//! the handler with panics contained, and always returns a
//! [`ToolCallResult`].

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{AgentError, Result};
use crate::prompt::describe_tools;
use crate::tool::{FnTool, Tool, ToolCallResult, ToolDefinition, ToolParameter, ToolParams, normalize_output};

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn Tool>,
}

/// Registry for available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Re-registering a name replaces the earlier entry.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    /// Register an already shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let definition = tool.definition();
        definition.validate()?;

        let name = definition.name.clone();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "Overwriting previously registered tool");
        }
        debug!(tool = %name, params = definition.parameters.len(), "Registered tool");

        self.tools.insert(
            name,
            RegisteredTool {
                definition,
                handler: tool,
            },
        );
        Ok(())
    }

    /// Register an async closure as a tool
    pub fn register_fn<F, Fut>(&mut self, definition: ToolDefinition, handler: F) -> Result<()>
    where
        F: Fn(ToolParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(FnTool::new(definition, handler))
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool handler by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| Arc::clone(&entry.handler))
    }

    /// Definition captured at registration time
    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|entry| &entry.definition)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All definitions, sorted by name
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.values().map(|entry| entry.definition.clone()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name. Never panics and never returns `Err`.
    pub async fn safe_execute(&self, name: &str, params: ToolParams) -> ToolCallResult {
        let started = Instant::now();

        let Some(entry) = self.tools.get(name) else {
            warn!(tool = %name, "Call to unknown tool");
            return ToolCallResult::failure(AgentError::ToolNotFound(name.to_string()).to_string())
                .with_tool_name(name)
                .with_execution_time(started.elapsed());
        };

        let outcome = match validate_params(&entry.definition, params) {
            Ok(validated) => {
                debug!(tool = %name, args = ?validated, "Executing tool");
                let handler = Arc::clone(&entry.handler);
                let run = async move { handler.execute(&validated).await };
                match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(Ok(value)) => Ok(normalize_output(value)),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(panic) => Err(format!("tool panicked: {}", panic_message(panic.as_ref()))),
                }
            }
            Err(e) => Err(e.to_string()),
        };

        let result = match outcome {
            Ok(value) => {
                debug!(tool = %name, "Tool succeeded");
                ToolCallResult::success(value)
            }
            Err(message) => {
                error!(tool = %name, error = %message, "Tool failed");
                ToolCallResult::failure(message).with_tool_name(name)
            }
        };
        result.with_execution_time(started.elapsed())
    }

    /// Render the catalog for inclusion in a prompt
    pub fn generate_prompt_section(&self) -> String {
        describe_tools(&self.list())
    }
}

/// Validate and coerce `params` against `definition`.
///
/// Returns the argument map the handler will see: coerced declared
/// parameters, defaults for omitted optional ones, and any undeclared
/// parameters passed through untouched.
pub fn validate_params(definition: &ToolDefinition, params: ToolParams) -> Result<ToolParams> {
    for required in definition.required_names() {
        if !params.contains_key(required) {
            return Err(AgentError::ToolValidation(format!(
                "missing required parameter: {required}"
            )));
        }
    }

    let mut validated = ToolParams::new();
    for (name, value) in params {
        if let Some(spec) = definition.parameters.get(&name) {
            let required = definition.is_required(&name);
            if let Some(coerced) = coerce_param(&name, value, spec, required)? {
                validated.insert(name, coerced);
            }
        } else {
            warn!(tool = %definition.name, parameter = %name, "Passing through undeclared parameter");
            validated.insert(name, value);
        }
    }

    for (name, spec) in &definition.parameters {
        if !validated.contains_key(name) {
            if let Some(default) = &spec.default {
                validated.insert(name.clone(), default.clone());
            }
        }
    }

    Ok(validated)
}

fn coerce_param(
    name: &str,
    value: Value,
    spec: &ToolParameter,
    required: bool,
) -> Result<Option<Value>> {
    if value.is_null() {
        if required {
            return Err(AgentError::ToolValidation(format!(
                "required parameter '{name}' cannot be null"
            )));
        }
        return Ok(spec.default.clone());
    }

    let coerced = spec
        .param_type
        .coerce(value)
        .map_err(|reason| AgentError::ToolValidation(format!("parameter '{name}': {reason}")))?;

    if let (Some(allowed), Some(s)) = (&spec.enum_values, coerced.as_str()) {
        if !allowed.iter().any(|a| a == s) {
            return Err(AgentError::ToolValidation(format!(
                "parameter '{name}' must be one of [{}], got \"{s}\"",
                allowed.join(", ")
            )));
        }
    }

    Ok(Some(coerced))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Adder;

    #[async_trait]
    impl Tool for Adder {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("add", "Add two integers")
                .param("a", ToolParameter::integer("Left operand").required())
                .param("b", ToolParameter::integer("Right operand").with_default(0))
        }

        async fn execute(&self, params: &ToolParams) -> Result<Value> {
            let a = params["a"].as_i64().unwrap_or_default();
            let b = params["b"].as_i64().unwrap_or_default();
            Ok(json!(a + b))
        }
    }

    fn params(value: Value) -> ToolParams {
        value.as_object().cloned().unwrap_or_default()
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Adder).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_coerces_numeric_strings_and_wraps_output() {
        let result = registry().safe_execute("add", params(json!({"a": "3", "b": 4}))).await;
        assert!(result.success, "{result:?}");
        assert_eq!(result.result, Some(json!({"output": 7})));
        assert!(result.execution_time.is_some());
    }

    #[tokio::test]
    async fn test_default_fills_omitted_parameter() {
        let result = registry().safe_execute("add", params(json!({"a": 5}))).await;
        assert_eq!(result.result, Some(json!({"output": 5})));

        let result = registry().safe_execute("add", params(json!({"a": 5, "b": null}))).await;
        assert_eq!(result.result, Some(json!({"output": 5})));
    }

    #[tokio::test]
    async fn test_missing_required_fails() {
        let result = registry().safe_execute("add", params(json!({"b": 1}))).await;
        assert!(!result.success);
        assert!(result.error_message().unwrap().contains("missing required parameter: a"));
        assert_eq!(result.tool_name.as_deref(), Some("add"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let result = registry().safe_execute("nope", ToolParams::new()).await;
        assert!(!result.success);
        assert_eq!(result.error_message(), Some("unknown tool: nope"));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(ToolDefinition::new("explode", "Always panics"), |_params| async move {
                if true {
                    panic!("kaboom");
                }
                Ok(Value::Null)
            })
            .unwrap();

        let result = registry.safe_execute("explode", ToolParams::new()).await;
        assert!(!result.success);
        assert!(result.error_message().unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failure() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(ToolDefinition::new("fail", "Always fails"), |_params| async move {
                Err(AgentError::ToolExecution("disk full".into()))
            })
            .unwrap();

        let result = registry.safe_execute("fail", ToolParams::new()).await;
        assert_eq!(result.error_message(), Some("Tool execution error: disk full"));
    }

    #[tokio::test]
    async fn test_enum_and_undeclared_parameters() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(
                ToolDefinition::new("mode", "Echo arguments")
                    .param("level", ToolParameter::string("Level").with_enum(["low", "high"])),
                |params| async move { Ok(Value::Object(params)) },
            )
            .unwrap();

        let bad = registry.safe_execute("mode", params(json!({"level": "max"}))).await;
        assert!(!bad.success);

        let ok = registry
            .safe_execute("mode", params(json!({"level": "low", "extra": [1]})))
            .await;
        assert_eq!(ok.result, Some(json!({"level": "low", "extra": [1]})));
    }

    #[test]
    fn test_register_overwrites_and_lists_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Adder).unwrap();
        registry
            .register_fn(ToolDefinition::new("add", "Replacement"), |_p| async { Ok(json!(0)) })
            .unwrap();
        registry
            .register_fn(ToolDefinition::new("abs", "Absolute"), |_p| async { Ok(json!(0)) })
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["abs", "add"]);
        assert_eq!(registry.definition("add").unwrap().description, "Replacement");
        assert!(registry.contains("abs"));
        assert!(registry.unregister("abs"));
        assert!(!registry.contains("abs"));
    }

    #[test]
    fn test_register_rejects_invalid_definition() {
        let mut registry = ToolRegistry::new();
        let result = registry
            .register_fn(ToolDefinition::new("", "No name"), |_p| async { Ok(Value::Null) });
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_prompt_section_lists_parameters() {
        let section = registry().generate_prompt_section();
        assert!(section.contains("add"));
        assert!(section.contains("`a` (integer, required)"));
    }
}
