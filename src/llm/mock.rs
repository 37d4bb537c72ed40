//! Scripted models for tests and offline runs
//!
//! Both doubles replay a queue of prepared responses and record what they
//! were asked, so callers can assert on the exact transcript a model saw.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{Message, Metadata, Result, TenxError, TokenUsage, ToolCall, ToolDefinition};
use crate::llm::prompt;
use crate::llm::traits::{
    GenerateOptions, LLMProvider, LLMResponse, LanguageModel, ModelReply, ModelResponse,
};
use crate::output::OutputSchema;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A request observed by [`ScriptedProvider`]
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Value>,
    pub options: Option<GenerateOptions>,
}

/// Transport that replays prepared responses
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<LLMResponse>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a full response
    pub fn then(self, response: LLMResponse) -> Self {
        lock(&self.script).push_back(Ok(response));
        self
    }

    /// Queue a text-only response
    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.then(LLMResponse {
            content: text.into(),
            ..Default::default()
        })
    }

    /// Queue a transport failure
    pub fn then_error(self, error: TenxError) -> Self {
        lock(&self.script).push_back(Err(error));
        self
    }

    /// Requests seen so far, oldest first
    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.requests).clone()
    }

    fn respond(&self, request: ProviderRequest) -> Result<LLMResponse> {
        lock(&self.requests).push(request);
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Err(TenxError::provider("scripted provider has no responses left")))
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        self.respond(ProviderRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: Vec::new(),
            options,
        })
    }

    async fn chat_with_tools(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Value],
        options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        self.respond(ProviderRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            options,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Language model that replays prepared rounds
pub struct ScriptedModel {
    name: String,
    native: bool,
    script: Mutex<VecDeque<Result<ModelResponse>>>,
    seen: Mutex<Vec<Vec<Message>>>,
    metadata_seen: Mutex<Vec<Metadata>>,
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            name: "scripted".to_string(),
            native: true,
            script: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
            metadata_seen: Mutex::new(Vec::new()),
        }
    }

    /// Report prompted rather than native tool calling
    pub fn manual(mut self) -> Self {
        self.native = false;
        self
    }

    /// Queue a round
    pub fn then(self, response: Result<ModelResponse>) -> Self {
        lock(&self.script).push_back(response);
        self
    }

    /// Queue a final answer
    pub fn then_reply(self, text: impl Into<String>, usage: TokenUsage) -> Self {
        self.then(Ok(ModelResponse::final_text(text).with_usage(usage)))
    }

    /// Queue a tool-calling round
    pub fn then_call(self, calls: Vec<ToolCall>, usage: TokenUsage) -> Self {
        self.then(Ok(ModelResponse::tool_calls(calls).with_usage(usage)))
    }

    /// Queue a failure
    pub fn then_error(self, error: TenxError) -> Self {
        self.then(Err(error))
    }

    /// Transcripts passed to `complete`, one per round
    pub fn transcripts(&self) -> Vec<Vec<Message>> {
        lock(&self.seen).clone()
    }

    /// Metadata passed to `complete`, one per round
    pub fn metadata_seen(&self) -> Vec<Metadata> {
        lock(&self.metadata_seen).clone()
    }

    /// Number of rounds served
    pub fn calls(&self) -> usize {
        lock(&self.seen).len()
    }

    /// Rounds still queued
    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn supports_native_tool_calling(&self) -> bool {
        self.native
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .filter_map(|tool| serde_json::to_value(tool).ok())
            .collect()
    }

    fn build_system_prompt(
        &self,
        tools: &[ToolDefinition],
        output: Option<&OutputSchema>,
        instructions: Option<&str>,
    ) -> String {
        let section = if self.native {
            prompt::native_tool_section(tools)
        } else {
            prompt::manual_tool_section(tools)
        };
        prompt::compose(instructions, section, output)
    }

    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
        metadata: &Metadata,
    ) -> Result<ModelResponse> {
        lock(&self.seen).push(messages.to_vec());
        lock(&self.metadata_seen).push(metadata.clone());

        let mut response = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Err(TenxError::provider("scripted model has no responses left")))?;
        if response.model.is_empty() {
            response.model = self.name.clone();
        }
        if let ModelReply::Final(text) = &response.reply {
            if text.trim().is_empty() {
                return Err(TenxError::malformed(0, text)
                    .with_usage(response.usage.unwrap_or_default()));
            }
        }
        Ok(response)
    }
}
