//! Test doubles for the reasoning engine.
//!
//! [`ScriptedProvider`] is a queue-based fake completion service: each call
//! pops the next scripted reply and records the prompt it was given.
//! [`FakeRemote`] is an in-memory [`RemoteToolSource`] whose streaming
//! behaviour can be scripted per tool.
//!
//! Enabled for this crate's tests and, for downstream crates, through the
//! `test-utils` feature.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use crate::context::ConversationContext;
use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{GenerationOptions, LlmProvider};
use crate::remote::{RemoteEvent, RemoteEventStream, RemoteToolSource};
use crate::tool::{ToolCallResult, ToolDefinition, ToolParams};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One scripted reply
#[derive(Clone, Debug)]
pub enum Reply {
    Text(String),
    Error(String),
    /// Never resolves; exercises timeouts and cancellation
    Hang,
}

/// Queue-based completion service
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    repeat: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// Replies with `texts` in order, then fails
    pub fn new<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(texts.into_iter().map(|t| Reply::Text(t.into())).collect()),
            ..Self::default()
        }
    }

    /// Replies with `text` once the queue is empty, forever
    pub fn repeating(text: impl Into<String>) -> Self {
        Self {
            repeat: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn then(self, reply: Reply) -> Self {
        lock(&self.replies).push_back(reply);
        self
    }

    /// Every prompt received, in call order
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.prompts).len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(&self, prompt: &str, _options: &GenerationOptions) -> Result<String> {
        lock(&self.prompts).push(prompt.to_string());
        let next = lock(&self.replies).pop_front();

        match next {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Error(message)) => Err(AgentError::Provider(message)),
            Some(Reply::Hang) => futures::future::pending::<Result<String>>().await,
            None => self
                .repeat
                .clone()
                .ok_or_else(|| AgentError::Provider("script exhausted".into())),
        }
    }

    async fn chat(&self, messages: &[Message], options: &GenerationOptions) -> Result<String> {
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.complete(&prompt, options).await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["scripted".into()])
    }
}

/// How [`FakeRemote`] answers a streamed call
#[derive(Clone, Debug)]
pub enum StreamScript {
    /// `Started`, then `Result` with the tool's configured result
    Complete,
    /// Exactly these events, then end of stream
    Events(Vec<RemoteEvent>),
}

/// In-memory remote tool catalog
#[derive(Debug, Default)]
pub struct FakeRemote {
    definitions: Vec<ToolDefinition>,
    results: HashMap<String, ToolCallResult>,
    streams: HashMap<String, StreamScript>,
    calls: Mutex<Vec<(String, &'static str)>>,
    sessions: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer `definition`, answering calls with `result`
    #[must_use]
    pub fn with_tool(mut self, definition: ToolDefinition, result: ToolCallResult) -> Self {
        self.results.insert(definition.name.clone(), result);
        self.definitions.push(definition);
        self
    }

    #[must_use]
    pub fn with_stream(mut self, tool: impl Into<String>, script: StreamScript) -> Self {
        self.streams.insert(tool.into(), script);
        self
    }

    /// `(tool, "call" | "stream")` in call order
    pub fn calls(&self) -> Vec<(String, &'static str)> {
        lock(&self.calls).clone()
    }

    /// Sessions currently open
    pub fn open_sessions(&self) -> Vec<String> {
        lock(&self.sessions).clone()
    }

    fn result_for(&self, name: &str) -> ToolCallResult {
        self.results.get(name).cloned().unwrap_or_else(|| {
            ToolCallResult::failure(format!("unknown tool: {name}")).with_tool_name(name)
        })
    }
}

#[async_trait]
impl RemoteToolSource for FakeRemote {
    async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }

    async fn call_tool(
        &self,
        name: &str,
        _params: &ToolParams,
        _session_id: Option<&str>,
    ) -> ToolCallResult {
        lock(&self.calls).push((name.to_string(), "call"));
        self.result_for(name)
    }

    fn stream_tool_call(
        &self,
        name: &str,
        params: &ToolParams,
        _session_id: Option<&str>,
    ) -> RemoteEventStream {
        lock(&self.calls).push((name.to_string(), "stream"));
        let events = match self.streams.get(name) {
            Some(StreamScript::Events(events)) => events.clone(),
            Some(StreamScript::Complete) | None => vec![
                RemoteEvent::Started {
                    tool_name: name.to_string(),
                    parameters: Value::Object(params.clone()),
                },
                RemoteEvent::Result(self.result_for(name)),
            ],
        };
        futures::stream::iter(events).boxed()
    }

    async fn create_session(&self, context: &ConversationContext) -> Option<String> {
        let id = context.session_id.to_string();
        lock(&self.sessions).push(id.clone());
        Some(id)
    }

    async fn delete_session(&self, session_id: &str) -> bool {
        let mut sessions = lock(&self.sessions);
        let before = sessions.len();
        sessions.retain(|s| s != session_id);
        sessions.len() != before
    }
}
