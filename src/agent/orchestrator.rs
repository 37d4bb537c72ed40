//! Agent orchestrator
//!
//! Drives one query to completion: the model is asked, any tool calls it
//! makes are executed and fed back, and the loop repeats until the model
//! gives a final answer or the LLM call budget runs out.

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::Instrument;

use crate::agent::history::{SessionHistory, Transcript, DEFAULT_SESSION};
use crate::agent::loop_state::AgentLoopState;
use crate::core::error::excerpt;
use crate::core::{Config, Message, Metadata, Result, TenxError, TokenUsage, ToolDefinition};
use crate::llm::{self, LanguageModel, ModelReply, ModelResponse};
use crate::output::OutputSchema;
use crate::tools::{Tool, ToolExecutor, ToolRegistry};

/// Final output of a run
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    /// Free text answer
    Text(String),
    /// Answer validated against the output schema
    Structured(Value),
}

impl AgentOutput {
    /// Text form; structured output is rendered as compact JSON
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => value.to_string(),
        }
    }
}

/// What a run returns
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub output: AgentOutput,
    /// Caller metadata with the run's accumulated counters
    pub metadata: Metadata,
    /// Model rounds used
    pub llm_calls: usize,
}

impl AgentResponse {
    /// Text of the answer
    pub fn text(&self) -> String {
        self.output.to_text()
    }

    /// Deserialize the answer into a caller type
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match &self.output {
            AgentOutput::Structured(value) => value.clone(),
            AgentOutput::Text(text) => serde_json::from_str(text)?,
        };
        Ok(serde_json::from_value(value)?)
    }

    /// Accumulated token usage
    pub fn usage(&self) -> TokenUsage {
        self.metadata.usage
    }
}

/// Input of a run
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub query: String,
    /// Session to read and extend; `"default"` when unset
    pub session_id: Option<String>,
    /// Caller metadata forwarded to the model and every tool
    pub metadata: Option<Metadata>,
    /// Explicit history; when set, the session store is not touched
    pub history: Option<Vec<Message>>,
}

impl RunRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn history(mut self, history: Vec<Message>) -> Self {
        self.history = Some(history);
        self
    }
}

impl From<&str> for RunRequest {
    fn from(query: &str) -> Self {
        Self::new(query)
    }
}

impl From<String> for RunRequest {
    fn from(query: String) -> Self {
        Self::new(query)
    }
}

/// Builder for [`Agent`]
pub struct AgentBuilder {
    model: Arc<dyn LanguageModel>,
    name: String,
    system_prompt: Option<String>,
    tools: Vec<Arc<dyn Tool>>,
    output: Option<OutputSchema>,
    max_llm_calls: usize,
    malformed_retries: usize,
    tool_timeout: Option<Duration>,
    history: Option<SessionHistory>,
}

impl AgentBuilder {
    fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            name: "tenx".to_string(),
            system_prompt: None,
            tools: Vec::new(),
            output: None,
            max_llm_calls: 10,
            malformed_retries: 0,
            tool_timeout: None,
            history: None,
        }
    }

    /// Agent name used in logs
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Instructions placed at the top of the system message
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Add a tool
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Require final answers to match a JSON schema
    pub fn output_schema(mut self, schema: OutputSchema) -> Self {
        self.output = Some(schema);
        self
    }

    /// Require final answers to match the schema of `T`
    pub fn output_type<T: JsonSchema>(self) -> Self {
        self.output_schema(OutputSchema::for_type::<T>())
    }

    pub fn max_llm_calls(mut self, max: usize) -> Self {
        self.max_llm_calls = max;
        self
    }

    /// Times a malformed model response is re-asked before the run fails
    pub fn malformed_response_retries(mut self, retries: usize) -> Self {
        self.malformed_retries = retries;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    /// Share a history store between agents
    pub fn history(mut self, history: SessionHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// Build the agent; fails on duplicate tool names or a zero budget
    pub fn build(self) -> Result<Agent> {
        if self.max_llm_calls == 0 {
            return Err(TenxError::config("max_llm_calls must be at least 1"));
        }

        let mut registry = ToolRegistry::new();
        for tool in self.tools {
            registry.register(tool)?;
        }

        Ok(Agent {
            name: self.name,
            model: self.model,
            executor: ToolExecutor::new(registry).with_timeout(self.tool_timeout),
            output: self.output,
            system_prompt: self.system_prompt,
            max_llm_calls: self.max_llm_calls,
            malformed_retries: self.malformed_retries,
            history: self.history.unwrap_or_default(),
        })
    }
}

/// An agent: a model, its tools and the loop that connects them
pub struct Agent {
    name: String,
    model: Arc<dyn LanguageModel>,
    executor: ToolExecutor,
    output: Option<OutputSchema>,
    system_prompt: Option<String>,
    max_llm_calls: usize,
    malformed_retries: usize,
    history: SessionHistory,
}

impl Agent {
    /// Start building an agent around a model
    pub fn builder(model: Arc<dyn LanguageModel>) -> AgentBuilder {
        AgentBuilder::new(model)
    }

    /// Builder preloaded from configuration, with the configured model
    pub fn from_config(config: &Config) -> Result<AgentBuilder> {
        config.validate()?;
        let agent = &config.agent;
        let mut builder = AgentBuilder::new(llm::model_from_config(config)?)
            .name(agent.name.clone())
            .max_llm_calls(agent.max_llm_calls)
            .malformed_response_retries(agent.malformed_response_retries);
        if let Some(prompt) = &agent.system_prompt {
            builder = builder.system_prompt(prompt.clone());
        }
        if let Some(secs) = agent.tool_timeout_secs {
            builder = builder.tool_timeout(Duration::from_secs(secs));
        }
        Ok(builder)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The session store this agent reads and writes
    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.executor.registry()
    }

    pub fn output_schema(&self) -> Option<&OutputSchema> {
        self.output.as_ref()
    }

    /// The system message this agent would start a session with
    pub fn system_message(&self) -> Message {
        self.build_system_message(&self.tools().definitions())
    }

    fn build_system_message(&self, tools: &[ToolDefinition]) -> Message {
        Message::system(self.model.build_system_prompt(
            tools,
            self.output.as_ref(),
            self.system_prompt.as_deref(),
        ))
    }

    /// Run one query to completion
    pub async fn run(&self, request: impl Into<RunRequest>) -> Result<AgentResponse> {
        let request = request.into();
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| DEFAULT_SESSION.to_string());
        let span = tracing::info_span!(
            "agent.run",
            agent = %self.name,
            session = %session_id,
            explicit_history = request.history.is_some()
        );
        self.run_loop(request, session_id).instrument(span).await
    }

    async fn run_loop(&self, request: RunRequest, session_id: String) -> Result<AgentResponse> {
        let RunRequest {
            query,
            metadata,
            history,
            ..
        } = request;
        let mut metadata = metadata.unwrap_or_default();
        let tools = self.tools().definitions();
        let system = || self.build_system_message(&tools);

        let mut transcript = match history {
            Some(history) => Transcript::ephemeral(history, system)?,
            None => Transcript::persistent(&self.history, &session_id, system)?,
        };
        transcript.push(Message::user(query))?;

        let mut state = AgentLoopState::new(self.max_llm_calls, self.malformed_retries);

        loop {
            let iteration = state
                .enter_model()
                .map_err(|e| e.with_usage(metadata.usage))?;
            tracing::debug!(
                iteration,
                messages = transcript.len(),
                model = self.model.model_name(),
                "calling model"
            );

            let response = match self
                .model
                .complete(transcript.messages(), &tools, &metadata)
                .await
                .and_then(check_reply)
            {
                Ok(response) => response,
                Err(TenxError::MalformedResponse {
                    excerpt: raw,
                    usage,
                    ..
                }) => {
                    metadata.record_usage(&usage);
                    state.record_response(&raw);
                    if state.take_retry() {
                        tracing::warn!(iteration, response = %raw, "malformed model response, asking again");
                        continue;
                    }
                    state.fail();
                    return Err(TenxError::MalformedResponse {
                        iteration,
                        excerpt: raw,
                        usage: metadata.usage,
                    });
                }
                Err(e) => {
                    state.fail();
                    return Err(e);
                }
            };

            state.record_response(&response.raw);
            if let Some(usage) = &response.usage {
                metadata.record_usage(usage);
            }

            match response.reply {
                ModelReply::Final(text) => {
                    transcript.push(Message::assistant(text.clone()))?;

                    let output = match &self.output {
                        Some(schema) => match schema.validate(&text, &metadata.usage) {
                            Ok(value) => AgentOutput::Structured(value),
                            Err(violation) => {
                                state.fail();
                                return Err(TenxError::FormatViolation {
                                    iteration,
                                    detail: violation.to_string(),
                                    excerpt: excerpt(&text),
                                    usage: metadata.usage,
                                });
                            }
                        },
                        None => AgentOutput::Text(text),
                    };

                    state.finish();
                    tracing::info!(
                        llm_calls = state.llm_calls,
                        tool_turns = state.tool_turns,
                        total_tokens = metadata.usage.total_tokens,
                        "agent run completed"
                    );
                    return Ok(AgentResponse {
                        output,
                        metadata,
                        llm_calls: state.llm_calls,
                    });
                }
                ModelReply::ToolCalls { content, calls } => {
                    state.enter_tools();
                    tracing::debug!(iteration, calls = calls.len(), "executing tool calls");
                    transcript.push(Message::assistant_with_tools(content, calls.clone()))?;

                    let outcomes = self.executor.execute_all(&calls, &metadata).await;
                    for outcome in outcomes {
                        if let Some(usage) = &outcome.usage {
                            metadata.merge_usage(usage);
                        }
                        transcript.push(Message::tool(outcome.call_id, outcome.content))?;
                    }
                }
            }
        }
    }
}

/// Treat replies that carry nothing usable as malformed
fn check_reply(response: ModelResponse) -> Result<ModelResponse> {
    let empty = match &response.reply {
        ModelReply::Final(text) => text.trim().is_empty(),
        ModelReply::ToolCalls { calls, .. } => calls.is_empty(),
    };
    if empty {
        return Err(TenxError::malformed(0, &response.raw)
            .with_usage(response.usage.unwrap_or_default()));
    }
    Ok(response)
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model.model_name())
            .field("tools", self.executor.registry())
            .field("max_llm_calls", &self.max_llm_calls)
            .finish()
    }
}
