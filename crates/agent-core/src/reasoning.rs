//! Reasoning Loop
//!
//! Think → decide → act state machine. Each iteration asks the model for
//! free-text reasoning, then for a JSON decision naming one tool, then runs
//! that tool (locally first, remotely otherwise) and folds the result back
//! into the conversation. Progress is reported as an ordered stream of
//! [`ThoughtEvent`]s.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{OnceCell, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::ConversationContext;
use crate::decision::{Action, Decision, FINAL_ANSWER_TOOL, parse_decision};
use crate::error::{AgentError, Result};
use crate::event::ThoughtEvent;
use crate::message::Role;
use crate::prompt::PromptProfile;
use crate::provider::{GenerationOptions, LlmProvider};
use crate::registry::ToolRegistry;
use crate::remote::{RemoteEvent, RemoteToolSource};
use crate::tool::{ToolCallResult, ToolDefinition, ToolParameter, ToolParams};

/// Answer given when the iteration bound is reached
pub const MAX_ITERATIONS_ANSWER: &str = "I reached the maximum number of reasoning steps without reaching a conclusion. Try refining the question or providing more information.";

/// Answer recorded when `final_answer` arrives without an `answer`
pub const MISSING_ANSWER: &str = "No answer was produced.";

pub const THINKING_CONFIDENCE: f64 = 0.8;
pub const FINAL_ANSWER_CONFIDENCE: f64 = 0.9;
pub const EXHAUSTED_CONFIDENCE: f64 = 0.7;

/// `file_path` values treated as "not really a path"
pub const DEFAULT_PATH_PLACEHOLDERS: [&str; 6] = [
    "string",
    "path",
    "filepath",
    "<path>",
    "<file_path>",
    "<filepath>",
];

const EVENT_BUFFER: usize = 64;

/// How long a terminal event may wait for room in a full event buffer
const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Maximum think/decide/act iterations per run
    pub max_iterations: usize,

    /// Generation options for every completion
    pub generation: GenerationOptions,

    /// Prompt templates to use
    pub profile: PromptProfile,

    /// Bound on each completion call
    pub llm_timeout: Duration,

    /// Bound on each tool dispatch
    pub tool_timeout: Duration,

    /// Prefer the streaming path for remote tools
    pub streaming_enabled: bool,

    /// Tool whose `file_path` is filled in from the conversation
    pub document_tool_name: String,

    /// Lower-cased `file_path` values considered placeholders
    pub path_placeholders: HashSet<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            generation: GenerationOptions::default(),
            profile: PromptProfile::General,
            llm_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(30),
            streaming_enabled: true,
            document_tool_name: "document_parser".into(),
            path_placeholders: DEFAULT_PATH_PLACEHOLDERS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Input to one run
#[derive(Clone, Debug, Default)]
pub struct RunRequest {
    pub query: String,
    pub document_content: Option<String>,
    pub document_type: Option<String>,
    pub document_file_path: Option<String>,
}

impl RunRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_document(mut self, content: impl Into<String>, document_type: Option<String>) -> Self {
        self.document_content = Some(content.into());
        self.document_type = document_type;
        self
    }

    #[must_use]
    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.document_file_path = Some(path.into());
        self
    }
}

/// Everything a completed run produced
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub events: Vec<ThoughtEvent>,
    pub context: ConversationContext,
}

impl RunOutcome {
    /// Content of the terminal `FinalAnswer` event, if the run ended with one
    pub fn answer(&self) -> Option<&str> {
        match self.events.last() {
            Some(ThoughtEvent::FinalAnswer { content, .. }) => Some(content),
            _ => None,
        }
    }
}

/// A run executing on a background task.
///
/// Yields events in order; [`RunHandle::join`] returns the final context.
pub struct RunHandle {
    events: ReceiverStream<ThoughtEvent>,
    cancel: CancellationToken,
    join: JoinHandle<ConversationContext>,
}

impl RunHandle {
    /// Ask the run to stop at its next suspension point
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to finish
    pub async fn join(self) -> Result<ConversationContext> {
        self.join
            .await
            .map_err(|e| AgentError::Other(format!("reasoning task failed: {e}")))
    }
}

impl Stream for RunHandle {
    type Item = ThoughtEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

/// Why a run stopped early
enum Halt {
    Cancelled,
    Disconnected,
    Failed(AgentError),
}

/// Sender half of the event stream, aware of cancellation
struct EventSink<'a> {
    tx: mpsc::Sender<ThoughtEvent>,
    cancel: &'a CancellationToken,
}

impl EventSink<'_> {
    async fn emit(&self, event: ThoughtEvent) -> std::result::Result<(), Halt> {
        debug!(kind = event.kind(), "Emitting event");
        until_cancelled(self.cancel, self.tx.send(event))
            .await?
            .map_err(|_| Halt::Disconnected)
    }
}

async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> std::result::Result<F::Output, Halt> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Halt::Cancelled),
        out = fut => Ok(out),
    }
}

/// Definition of the reserved terminal pseudo-tool
pub fn final_answer_definition() -> ToolDefinition {
    ToolDefinition::new(
        FINAL_ANSWER_TOOL,
        "Call this tool when you have enough information to give the user the final answer.",
    )
    .param(
        "answer",
        ToolParameter::string("The complete final answer for the user").required(),
    )
}

/// The main Agent struct
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    remote: Option<Arc<dyn RemoteToolSource>>,
    config: AgentConfig,
    catalog: OnceCell<Vec<ToolDefinition>>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        remote: Option<Arc<dyn RemoteToolSource>>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            remote,
            config,
            catalog: OnceCell::new(),
        }
    }

    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub const fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Merged tool catalog, assembled on first use.
    ///
    /// Local tools come first, then `final_answer`, then remote tools whose
    /// names aren't already present.
    pub async fn catalog(&self) -> &[ToolDefinition] {
        self.catalog
            .get_or_init(|| async {
                let mut catalog: Vec<ToolDefinition> = self
                    .tools
                    .list()
                    .into_iter()
                    .filter(|tool| {
                        let reserved = tool.name == FINAL_ANSWER_TOOL;
                        if reserved {
                            warn!("Ignoring local tool named {FINAL_ANSWER_TOOL}; the name is reserved");
                        }
                        !reserved
                    })
                    .collect();
                catalog.push(final_answer_definition());

                if let Some(remote) = &self.remote {
                    for definition in remote.list_tools().await {
                        if catalog.iter().any(|t| t.name == definition.name) {
                            debug!(tool = %definition.name, "Remote tool shadowed by existing entry");
                        } else {
                            catalog.push(definition);
                        }
                    }
                }

                info!(
                    tools = catalog.len(),
                    local = self.tools.len(),
                    "Assembled tool catalog"
                );
                catalog
            })
            .await
    }

    /// Spawn a run on the runtime and return a handle streaming its events
    pub fn stream(self: &Arc<Self>, request: RunRequest) -> RunHandle {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let agent = Arc::clone(self);
        let token = cancel.clone();
        let join = tokio::spawn(async move { agent.run(request, tx, token).await });

        RunHandle {
            events: ReceiverStream::new(rx),
            cancel,
            join,
        }
    }

    /// Run to the end, collecting every event
    pub async fn run_to_completion(&self, request: RunRequest) -> RunOutcome {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let run = self.run(request, tx, CancellationToken::new());
        let collect = async {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        };

        let (context, events) = tokio::join!(run, collect);
        RunOutcome { events, context }
    }

    /// Drive one run, pushing events into `events` in order.
    ///
    /// Always returns the final context. Exactly one terminal event is sent
    /// unless the receiver went away first.
    pub async fn run(
        &self,
        request: RunRequest,
        events: mpsc::Sender<ThoughtEvent>,
        cancel: CancellationToken,
    ) -> ConversationContext {
        let catalog = self.catalog().await.to_vec();
        let mut ctx = ConversationContext::new(request.query)
            .with_document(
                request.document_content,
                request.document_type,
                request.document_file_path,
            )
            .with_max_iterations(self.config.max_iterations);
        ctx.available_tools = catalog;
        let query = ctx.user_query.clone();
        ctx.push(Role::User, query);

        info!(
            session_id = %ctx.session_id,
            has_document = ctx.has_document(),
            max_iterations = ctx.max_iterations,
            "Starting reasoning run"
        );

        let remote_session = match &self.remote {
            Some(remote) => remote.create_session(&ctx).await,
            None => None,
        };
        let session_id = remote_session
            .clone()
            .unwrap_or_else(|| ctx.session_id.to_string());

        let sink = EventSink {
            tx: events,
            cancel: &cancel,
        };

        match self.drive(&mut ctx, &sink, &session_id).await {
            Ok(()) => {}
            Err(Halt::Cancelled) => {
                info!(session_id = %ctx.session_id, "Run cancelled");
                let event = ThoughtEvent::error(AgentError::Cancelled.to_string());
                match tokio::time::timeout(TERMINAL_SEND_TIMEOUT, sink.tx.send(event)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => debug!("Event receiver dropped before cancellation was reported"),
                    Err(_) => warn!("Event consumer stalled; cancellation event not delivered"),
                }
            }
            Err(Halt::Disconnected) => {
                info!(session_id = %ctx.session_id, "Event receiver dropped; stopping run");
            }
            Err(Halt::Failed(e)) => {
                error!(session_id = %ctx.session_id, error = %e, "Reasoning failed");
                let _ = sink
                    .tx
                    .send(ThoughtEvent::error(format!("Reasoning failed: {e}")))
                    .await;
            }
        }

        if let (Some(remote), Some(id)) = (&self.remote, remote_session) {
            if !remote.delete_session(&id).await {
                debug!(session_id = %id, "Remote session was not deleted");
            }
        }

        info!(
            session_id = %ctx.session_id,
            iterations = ctx.current_iteration,
            completed = ctx.is_completed(),
            "Reasoning run finished"
        );
        ctx
    }

    async fn drive(
        &self,
        ctx: &mut ConversationContext,
        sink: &EventSink<'_>,
        session_id: &str,
    ) -> std::result::Result<(), Halt> {
        let profile = self.config.profile;

        while !ctx.is_completed() && ctx.iterations_remaining() {
            if sink.cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
            if sink.tx.is_closed() {
                return Err(Halt::Disconnected);
            }

            ctx.advance();
            debug!(iteration = ctx.current_iteration, "Starting iteration");

            // Think
            let prompt = profile.think_prompt(ctx, &ctx.available_tools);
            let thought = self.complete_step("think step", &prompt, sink.cancel).await?;
            sink.emit(ThoughtEvent::Thinking {
                content: thought.clone(),
                confidence: Some(THINKING_CONFIDENCE),
            })
            .await?;

            // Decide
            let prompt = profile.decide_prompt(&thought, &ctx.available_tools);
            let response = self.complete_step("decide step", &prompt, sink.cancel).await?;
            let decision = parse_decision(&response);
            if let Decision::Fallback { reason } = &decision {
                warn!(%reason, "Unusable decision; answering with fallback");
            }
            let mut action = decision.into_action();
            self.fill_placeholder_path(ctx, &mut action);

            // Act
            sink.emit(ThoughtEvent::ToolCall {
                tool_name: action.tool_name.clone(),
                parameters: action.parameters.clone(),
            })
            .await?;

            if action.is_final_answer() {
                let answer = action.answer().unwrap_or_else(|| MISSING_ANSWER.into());
                ctx.complete(answer.clone());
                ctx.push(Role::Assistant, answer.clone());
                info!(answer_len = answer.len(), "Final answer produced");
                sink.emit(ThoughtEvent::FinalAnswer {
                    content: answer,
                    confidence: Some(FINAL_ANSWER_CONFIDENCE),
                })
                .await?;
                return Ok(());
            }

            let result = until_cancelled(
                sink.cancel,
                self.dispatch(&action.tool_name, &action.parameters, session_id),
            )
            .await?;

            ctx.push(
                Role::Tool,
                format!("Tool {} result: {}", action.tool_name, result.to_history_text()),
            );
            sink.emit(ThoughtEvent::ToolResult {
                tool_name: action.tool_name,
                result,
            })
            .await?;
        }

        if !ctx.is_completed() {
            warn!(max_iterations = ctx.max_iterations, "Iteration bound reached");
            sink.emit(ThoughtEvent::FinalAnswer {
                content: MAX_ITERATIONS_ANSWER.into(),
                confidence: Some(EXHAUSTED_CONFIDENCE),
            })
            .await?;
        }
        Ok(())
    }

    async fn complete_step(
        &self,
        step: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, Halt> {
        debug!(step, prompt_len = prompt.len(), "Requesting completion");
        let call = tokio::time::timeout(
            self.config.llm_timeout,
            self.provider.complete(prompt, &self.config.generation),
        );

        match until_cancelled(cancel, call).await? {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(Halt::Failed(e)),
            Err(_) => Err(Halt::Failed(AgentError::Timeout {
                operation: step.to_string(),
                seconds: self.config.llm_timeout.as_secs(),
            })),
        }
    }

    /// Substitute the conversation's file path for a missing or placeholder
    /// `file_path` argument of the document tool
    fn fill_placeholder_path(&self, ctx: &ConversationContext, action: &mut Action) {
        if action.tool_name != self.config.document_tool_name {
            return;
        }
        let Some(path) = ctx.document_file_path.as_deref().filter(|p| !p.trim().is_empty()) else {
            return;
        };

        let is_placeholder = match action.parameters.get("file_path") {
            None | Some(Value::Null) => true,
            Some(Value::String(given)) => {
                let given = given.trim().to_ascii_lowercase();
                given.is_empty() || self.config.path_placeholders.contains(&given)
            }
            Some(_) => false,
        };

        if is_placeholder {
            info!(tool = %action.tool_name, file_path = %path, "Injecting document file path");
            action
                .parameters
                .insert("file_path".into(), Value::String(path.to_string()));
        }
    }

    /// Resolve and run a tool, bounded by the per-call timeout
    async fn dispatch(&self, name: &str, params: &ToolParams, session_id: &str) -> ToolCallResult {
        let call = async {
            match &self.remote {
                Some(remote) if !self.tools.contains(name) => {
                    self.dispatch_remote(remote.as_ref(), name, params, session_id)
                        .await
                }
                _ => self.tools.safe_execute(name, params.clone()).await,
            }
        };

        match tokio::time::timeout(self.config.tool_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                let err = AgentError::Timeout {
                    operation: format!("tool '{name}'"),
                    seconds: self.config.tool_timeout.as_secs(),
                };
                warn!(tool = %name, "Tool call timed out");
                ToolCallResult::failure(err.to_string()).with_tool_name(name)
            }
        }
    }

    async fn dispatch_remote(
        &self,
        remote: &dyn RemoteToolSource,
        name: &str,
        params: &ToolParams,
        session_id: &str,
    ) -> ToolCallResult {
        if self.config.streaming_enabled {
            let mut stream = remote.stream_tool_call(name, params, Some(session_id));
            while let Some(event) = stream.next().await {
                match event {
                    RemoteEvent::Result(result) => {
                        debug!(tool = %name, "Remote stream completed");
                        return result;
                    }
                    RemoteEvent::Error(error) => {
                        return ToolCallResult::failure(error).with_tool_name(name);
                    }
                    RemoteEvent::Started { .. } => debug!(tool = %name, "Remote call started"),
                    RemoteEvent::Code { language, .. } => {
                        debug!(tool = %name, %language, "Remote tool running code");
                    }
                    RemoteEvent::TextDelta(delta) => {
                        debug!(tool = %name, len = delta.len(), "Remote output");
                    }
                }
            }
            warn!(tool = %name, "Remote stream ended without a result; retrying as a direct call");
        }

        remote.call_tool(name, params, Some(session_id)).await
    }
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: Arc<ToolRegistry>,
    remote: Option<Arc<dyn RemoteToolSource>>,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: Arc::new(ToolRegistry::new()),
            remote: None,
            config: AgentConfig::default(),
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: impl Into<Arc<ToolRegistry>>) -> Self {
        self.tools = tools.into();
        self
    }

    #[must_use]
    pub fn remote(mut self, remote: Arc<dyn RemoteToolSource>) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    #[must_use]
    pub const fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    #[must_use]
    pub const fn profile(mut self, profile: PromptProfile) -> Self {
        self.config.profile = profile;
        self
    }

    #[must_use]
    pub const fn llm_timeout(mut self, timeout: Duration) -> Self {
        self.config.llm_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn streaming(mut self, enabled: bool) -> Self {
        self.config.streaming_enabled = enabled;
        self
    }

    #[must_use]
    pub fn document_tool(mut self, name: impl Into<String>) -> Self {
        self.config.document_tool_name = name.into();
        self
    }

    #[must_use]
    pub fn path_placeholders<I, S>(mut self, placeholders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.path_placeholders = placeholders
            .into_iter()
            .map(|p| p.as_ref().trim().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        if self.config.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }

        Ok(Agent::new(provider, self.tools, self.remote, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::FALLBACK_ANSWER;
    use crate::mock::{FakeRemote, Reply, ScriptedProvider, StreamScript};
    use serde_json::json;

    fn decision(tool: &str, params: &Value) -> String {
        json!({"action": {"type": "tool_call", "tool_name": tool, "parameters": params}}).to_string()
    }

    fn echo_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(
                ToolDefinition::new("echo", "Echo the arguments")
                    .param("text", ToolParameter::string("Text").required()),
                |params| async move { Ok(Value::Object(params)) },
            )
            .unwrap();
        registry
            .register_fn(
                ToolDefinition::new("document_parser", "Parse a document")
                    .param("file_path", ToolParameter::string("Path").required()),
                |params| async move { Ok(Value::Object(params)) },
            )
            .unwrap();
        registry
    }

    fn agent(provider: ScriptedProvider) -> (Agent, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let agent = Agent::builder()
            .provider(provider.clone())
            .tools(echo_registry())
            .max_iterations(3)
            .build()
            .unwrap();
        (agent, provider)
    }

    fn kinds(events: &[ThoughtEvent]) -> Vec<&'static str> {
        events.iter().map(ThoughtEvent::kind).collect()
    }

    #[tokio::test]
    async fn test_unparsable_decisions_end_with_fallback() {
        let (agent, _) = agent(ScriptedProvider::repeating("no idea, sorry"));
        let outcome = agent.run_to_completion(RunRequest::new("What is 2+2?")).await;

        assert_eq!(kinds(&outcome.events), vec!["thinking", "tool_call", "final_answer"]);
        assert!(matches!(
            &outcome.events[1],
            ThoughtEvent::ToolCall { tool_name, .. } if tool_name == FINAL_ANSWER_TOOL
        ));
        assert_eq!(outcome.answer(), Some(FALLBACK_ANSWER));
        assert_eq!(outcome.context.current_iteration, 1);
        assert!(outcome.context.is_completed());
    }

    #[tokio::test]
    async fn test_tool_then_answer() {
        let (agent, provider) = agent(ScriptedProvider::new([
            "I should echo".to_string(),
            decision("echo", &json!({"text": "hi"})),
            "Now I can answer".to_string(),
            decision(FINAL_ANSWER_TOOL, &json!({"answer": "hi"})),
        ]));
        let outcome = agent.run_to_completion(RunRequest::new("Say hi")).await;

        assert_eq!(
            kinds(&outcome.events),
            vec!["thinking", "tool_call", "tool_result", "thinking", "tool_call", "final_answer"]
        );
        let ThoughtEvent::ToolResult { result, .. } = &outcome.events[2] else {
            panic!("expected tool result");
        };
        assert_eq!(result.result, Some(json!({"text": "hi"})));
        assert_eq!(outcome.answer(), Some("hi"));
        assert_eq!(outcome.context.current_iteration, 2);
        assert_eq!(outcome.context.final_answer(), Some("hi"));

        let history: Vec<Role> = outcome.context.history().iter().map(|m| m.role).collect();
        assert_eq!(history, vec![Role::User, Role::Tool, Role::Assistant]);
        assert!(provider.prompts()[2].contains("tool: Tool echo result"));
    }

    #[tokio::test]
    async fn test_iteration_bound_produces_synthetic_answer() {
        let (agent, provider) = agent(ScriptedProvider::repeating(decision(
            "echo",
            &json!({"text": "again"}),
        )));
        let outcome = agent.run_to_completion(RunRequest::new("loop forever")).await;

        assert_eq!(outcome.context.current_iteration, 3);
        assert!(!outcome.context.is_completed());
        assert_eq!(outcome.answer(), Some(MAX_ITERATIONS_ANSWER));
        assert_eq!(provider.call_count(), 6);
        let ThoughtEvent::FinalAnswer { confidence, .. } = outcome.events.last().unwrap() else {
            panic!("expected final answer");
        };
        assert_eq!(*confidence, Some(EXHAUSTED_CONFIDENCE));
    }

    #[tokio::test]
    async fn test_every_result_follows_its_call() {
        let (agent, _) = agent(ScriptedProvider::repeating(decision("missing_tool", &json!({}))));
        let outcome = agent.run_to_completion(RunRequest::new("q")).await;

        let mut last_call = None;
        for event in &outcome.events {
            match event {
                ThoughtEvent::ToolCall { tool_name, .. } => last_call = Some(tool_name.clone()),
                ThoughtEvent::ToolResult { tool_name, result } => {
                    assert_eq!(last_call.as_ref(), Some(tool_name));
                    assert!(!result.success);
                }
                _ => {}
            }
        }
        assert_eq!(outcome.events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(outcome.events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_provider_error_ends_run() {
        let (agent, _) = agent(ScriptedProvider::default().then(Reply::Error("model offline".into())));
        let outcome = agent.run_to_completion(RunRequest::new("q")).await;

        assert_eq!(kinds(&outcome.events), vec!["error"]);
        let ThoughtEvent::Error { content } = &outcome.events[0] else {
            panic!("expected error");
        };
        assert!(content.contains("model offline"));
    }

    #[tokio::test]
    async fn test_llm_timeout_is_an_error_event() {
        let provider = Arc::new(ScriptedProvider::default().then(Reply::Hang));
        let agent = Agent::builder()
            .provider(provider)
            .llm_timeout(Duration::from_millis(20))
            .build()
            .unwrap();

        let outcome = agent.run_to_completion(RunRequest::new("q")).await;
        let ThoughtEvent::Error { content } = &outcome.events[0] else {
            panic!("expected error");
        };
        assert!(content.contains("think step timed out"));
    }

    #[tokio::test]
    async fn test_slow_tool_times_out_and_loop_continues() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(ToolDefinition::new("slow", "Never finishes"), |_p| async {
                futures::future::pending::<Result<Value>>().await
            })
            .unwrap();

        let provider = Arc::new(ScriptedProvider::new([
            "use slow".to_string(),
            decision("slow", &json!({})),
            "give up".to_string(),
            decision(FINAL_ANSWER_TOOL, &json!({"answer": "too slow"})),
        ]));
        let agent = Agent::builder()
            .provider(provider)
            .tools(registry)
            .tool_timeout(Duration::from_millis(20))
            .build()
            .unwrap();

        let outcome = agent.run_to_completion(RunRequest::new("q")).await;
        let ThoughtEvent::ToolResult { result, .. } = &outcome.events[2] else {
            panic!("expected tool result");
        };
        assert!(result.error_message().unwrap().contains("tool 'slow' timed out"));
        assert_eq!(outcome.answer(), Some("too slow"));
    }

    #[tokio::test]
    async fn test_placeholder_path_is_replaced() {
        let (agent, _) = agent(ScriptedProvider::new([
            "parse it".to_string(),
            decision("document_parser", &json!({"file_path": " <File_Path> "})),
            "done".to_string(),
            decision(FINAL_ANSWER_TOOL, &json!({"answer": "ok"})),
        ]));
        let request = RunRequest::new("summarise").with_file_path("/data/report.txt");
        let outcome = agent.run_to_completion(request).await;

        let ThoughtEvent::ToolCall { parameters, .. } = &outcome.events[1] else {
            panic!("expected tool call");
        };
        assert_eq!(parameters["file_path"], json!("/data/report.txt"));
    }

    #[tokio::test]
    async fn test_real_path_is_kept() {
        let (agent, _) = agent(ScriptedProvider::new([
            "parse it".to_string(),
            decision("document_parser", &json!({"file_path": "/other.txt"})),
        ]));
        let request = RunRequest::new("summarise").with_file_path("/data/report.txt");
        let outcome = agent.run_to_completion(request).await;

        let ThoughtEvent::ToolCall { parameters, .. } = &outcome.events[1] else {
            panic!("expected tool call");
        };
        assert_eq!(parameters["file_path"], json!("/other.txt"));
    }

    #[tokio::test]
    async fn test_catalog_merge() {
        let remote = FakeRemote::new()
            .with_tool(
                ToolDefinition::new("echo", "Remote echo"),
                ToolCallResult::success(json!({})),
            )
            .with_tool(
                ToolDefinition::new(FINAL_ANSWER_TOOL, "Impostor"),
                ToolCallResult::success(json!({})),
            )
            .with_tool(
                ToolDefinition::new("weather", "Remote weather"),
                ToolCallResult::success(json!({})),
            );
        let agent = Agent::builder()
            .provider(Arc::new(ScriptedProvider::default()))
            .tools(echo_registry())
            .remote(Arc::new(remote))
            .build()
            .unwrap();

        let names: Vec<String> = agent.catalog().await.iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["document_parser", "echo", FINAL_ANSWER_TOOL, "weather"]);
        let echo = agent.catalog().await.iter().find(|t| t.name == "echo").unwrap();
        assert_eq!(echo.description, "Echo the arguments");

        let again: Vec<String> = agent.catalog().await.iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, again);
    }

    fn remote_agent(remote: Arc<FakeRemote>, streaming: bool, decisions: [String; 4]) -> Agent {
        Agent::builder()
            .provider(Arc::new(ScriptedProvider::new(decisions)))
            .tools(echo_registry())
            .remote(remote)
            .streaming(streaming)
            .build()
            .unwrap()
    }

    fn weather_script() -> [String; 4] {
        [
            "check weather".to_string(),
            decision("weather", &json!({"city": "Oslo"})),
            "answer".to_string(),
            decision(FINAL_ANSWER_TOOL, &json!({"answer": "sunny"})),
        ]
    }

    #[tokio::test]
    async fn test_remote_dispatch_via_stream() {
        let remote = Arc::new(FakeRemote::new().with_tool(
            ToolDefinition::new("weather", "Remote weather"),
            ToolCallResult::success(json!({"sky": "clear"})),
        ));
        let agent = remote_agent(remote.clone(), true, weather_script());
        let outcome = agent.run_to_completion(RunRequest::new("weather?")).await;

        let ThoughtEvent::ToolResult { result, .. } = &outcome.events[2] else {
            panic!("expected tool result");
        };
        assert_eq!(result.result, Some(json!({"sky": "clear"})));
        assert_eq!(remote.calls(), vec![("weather".to_string(), "stream")]);
        assert!(remote.open_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_stream_without_result_falls_back_to_call() {
        let remote = Arc::new(
            FakeRemote::new()
                .with_tool(
                    ToolDefinition::new("weather", "Remote weather"),
                    ToolCallResult::success(json!({"sky": "grey"})),
                )
                .with_stream(
                    "weather",
                    StreamScript::Events(vec![RemoteEvent::TextDelta("partial".into())]),
                ),
        );
        let agent = remote_agent(remote.clone(), true, weather_script());
        let outcome = agent.run_to_completion(RunRequest::new("weather?")).await;

        let ThoughtEvent::ToolResult { result, .. } = &outcome.events[2] else {
            panic!("expected tool result");
        };
        assert_eq!(result.result, Some(json!({"sky": "grey"})));
        assert_eq!(
            remote.calls(),
            vec![("weather".to_string(), "stream"), ("weather".to_string(), "call")]
        );
    }

    #[tokio::test]
    async fn test_stream_error_is_failed_result() {
        let remote = Arc::new(
            FakeRemote::new()
                .with_tool(
                    ToolDefinition::new("weather", "Remote weather"),
                    ToolCallResult::success(json!({})),
                )
                .with_stream(
                    "weather",
                    StreamScript::Events(vec![RemoteEvent::Error("quota exceeded".into())]),
                ),
        );
        let agent = remote_agent(remote, true, weather_script());
        let outcome = agent.run_to_completion(RunRequest::new("weather?")).await;

        let ThoughtEvent::ToolResult { result, .. } = &outcome.events[2] else {
            panic!("expected tool result");
        };
        assert_eq!(result.error_message(), Some("quota exceeded"));
        assert_eq!(result.tool_name.as_deref(), Some("weather"));
    }

    #[tokio::test]
    async fn test_streaming_disabled_calls_directly() {
        let remote = Arc::new(FakeRemote::new().with_tool(
            ToolDefinition::new("weather", "Remote weather"),
            ToolCallResult::success(json!({"sky": "clear"})),
        ));
        let agent = remote_agent(remote.clone(), false, weather_script());
        agent.run_to_completion(RunRequest::new("weather?")).await;
        assert_eq!(remote.calls(), vec![("weather".to_string(), "call")]);
    }

    #[tokio::test]
    async fn test_cancelled_run_emits_cancellation_error() {
        let provider = Arc::new(ScriptedProvider::default().then(Reply::Hang));
        let agent = Arc::new(Agent::builder().provider(provider).build().unwrap());

        let mut handle = agent.stream(RunRequest::new("q"));
        handle.cancel();

        let mut events = Vec::new();
        while let Some(event) = handle.next().await {
            events.push(event);
        }
        let context = handle.join().await.unwrap();

        assert_eq!(events, vec![ThoughtEvent::error("run cancelled")]);
        assert!(!context.is_completed());
    }

    #[tokio::test]
    async fn test_cancellation_reported_when_buffer_is_full() {
        let provider = Arc::new(ScriptedProvider::new(["thinking it over"]).then(Reply::Hang));
        let agent = Agent::builder().provider(provider).build().unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        let watcher = tx.clone();
        let cancel = CancellationToken::new();
        let run = agent.run(RunRequest::new("q"), tx, cancel.clone());
        let consume = async move {
            // The thought occupies the only slot while the decide step hangs
            while watcher.capacity() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            cancel.cancel();
            drop(watcher);

            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        };

        let (context, events) = tokio::join!(run, consume);
        assert_eq!(kinds(&events), vec!["thinking", "error"]);
        assert_eq!(events[1], ThoughtEvent::error("run cancelled"));
        assert!(!context.is_completed());
    }

    #[tokio::test]
    async fn test_echo_then_answer_scenario() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(
                ToolDefinition::new("echo", "Repeat the given text")
                    .param("text", ToolParameter::string("Text to repeat").required()),
                |params| async move { Ok(params.get("text").cloned().unwrap_or_default()) },
            )
            .unwrap();
        let agent = Agent::builder()
            .provider(Arc::new(ScriptedProvider::new([
                "I will echo the greeting".to_string(),
                decision("echo", &json!({"text": "hi"})),
                "The tool said hi".to_string(),
                decision(FINAL_ANSWER_TOOL, &json!({"answer": "hi"})),
            ])))
            .tools(registry)
            .build()
            .unwrap();

        let outcome = agent.run_to_completion(RunRequest::new("Echo hi")).await;

        assert_eq!(
            kinds(&outcome.events),
            vec!["thinking", "tool_call", "tool_result", "thinking", "tool_call", "final_answer"]
        );
        assert!(matches!(
            &outcome.events[1],
            ThoughtEvent::ToolCall { tool_name, parameters }
                if tool_name == "echo" && parameters["text"] == json!("hi")
        ));
        let ThoughtEvent::ToolResult { tool_name, result } = &outcome.events[2] else {
            panic!("expected tool result");
        };
        assert_eq!(tool_name, "echo");
        assert!(result.success);
        assert_eq!(result.result, Some(json!({"output": "hi"})));
        assert_eq!(outcome.answer(), Some("hi"));
        assert!(outcome.context.is_completed());
        assert_eq!(outcome.context.current_iteration, 2);
    }

    fn scripted_reply() -> impl proptest::strategy::Strategy<Value = String> {
        use proptest::prelude::*;
        prop_oneof![
            Just("thinking out loud".to_string()),
            Just("{ broken json".to_string()),
            Just(decision("echo", &json!({"text": "hi"}))),
            Just(decision("echo", &json!({}))),
            Just(decision("missing_tool", &json!({}))),
            Just(decision(FINAL_ANSWER_TOOL, &json!({"answer": "done"}))),
        ]
    }

    proptest::proptest! {
        #[test]
        fn prop_every_run_ends_with_one_terminal_event(
            replies in proptest::collection::vec(scripted_reply(), 0..12),
            max_iterations in 1usize..5,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let agent = Agent::builder()
                .provider(Arc::new(ScriptedProvider::new(replies)))
                .tools(echo_registry())
                .max_iterations(max_iterations)
                .build()
                .unwrap();
            let outcome = runtime.block_on(agent.run_to_completion(RunRequest::new("q")));
            let events = &outcome.events;

            proptest::prop_assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
            proptest::prop_assert!(events.last().is_some_and(ThoughtEvent::is_terminal));
            proptest::prop_assert!(outcome.context.current_iteration <= max_iterations);

            for (i, event) in events.iter().enumerate() {
                if let ThoughtEvent::ToolResult { tool_name, .. } = event {
                    let preceded = i > 0 && matches!(
                        &events[i - 1],
                        ThoughtEvent::ToolCall { tool_name: called, .. } if called == tool_name
                    );
                    proptest::prop_assert!(preceded, "result at {} has no matching call", i);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_streamed_run_matches_collected_run() {
        let agent = Arc::new(
            Agent::builder()
                .provider(Arc::new(ScriptedProvider::new([
                    "answer directly".to_string(),
                    decision(FINAL_ANSWER_TOOL, &json!({"answer": "42"})),
                ])))
                .build()
                .unwrap(),
        );

        let mut handle = agent.stream(RunRequest::new("meaning of life?"));
        let mut events = Vec::new();
        while let Some(event) = handle.next().await {
            events.push(event);
        }
        let context = handle.join().await.unwrap();

        assert_eq!(kinds(&events), vec!["thinking", "tool_call", "final_answer"]);
        assert_eq!(context.final_answer(), Some("42"));
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(Agent::builder().build().is_err());
        assert!(
            Agent::builder()
                .provider(Arc::new(ScriptedProvider::default()))
                .max_iterations(0)
                .build()
                .is_err()
        );
    }
}
