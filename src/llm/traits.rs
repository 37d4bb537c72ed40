//! LLM traits for abstracting backends and tool-calling styles
//!
//! [`LLMProvider`] is the transport seam: it moves messages to a chat API and
//! back. [`LanguageModel`] sits on top and decides how tools are presented to
//! the model and how its reply is read back.

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{Message, Metadata, Result, TokenUsage, ToolCall, ToolDefinition};
use crate::output::OutputSchema;

/// Response from an LLM provider
#[derive(Debug, Clone, Default)]
pub struct LLMResponse {
    /// Text content of the response
    pub content: String,
    /// Any tool calls the model wants to make
    pub tool_calls: Vec<ToolCall>,
    /// Token usage information
    pub usage: Option<TokenUsage>,
    /// Model that generated the response
    pub model: String,
}

/// Options for LLM generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    /// Temperature for sampling (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Stop sequences
    pub stop: Option<Vec<String>>,
    /// Sampling seed for reproducible output
    pub seed: Option<u64>,
    /// End-user identifier forwarded to the provider
    pub user: Option<String>,
}

impl GenerateOptions {
    /// Apply per-run overrides found in the metadata extension map
    ///
    /// Recognized keys: `temperature`, `max_tokens`, `seed`, `user`.
    pub fn with_metadata(&self, metadata: &Metadata) -> Self {
        let mut options = self.clone();
        if let Some(t) = metadata.extra.get("temperature").and_then(Value::as_f64) {
            options.temperature = Some(t as f32);
        }
        if let Some(n) = metadata.extra.get("max_tokens").and_then(Value::as_u64) {
            options.max_tokens = u32::try_from(n).ok();
        }
        if let Some(seed) = metadata.extra.get("seed").and_then(Value::as_u64) {
            options.seed = Some(seed);
        }
        if let Some(user) = metadata.get_str("user") {
            options.user = Some(user.to_string());
        }
        options
    }
}

/// Trait for chat transports
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a response from messages
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: Option<GenerateOptions>,
    ) -> Result<LLMResponse>;

    /// Generate a response with tool specs already in the provider's format
    async fn chat_with_tools(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Value],
        options: Option<GenerateOptions>,
    ) -> Result<LLMResponse>;

    /// Get the provider name
    fn name(&self) -> &str;
}

/// What the model asked for in one round
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// A final answer, ending the run
    Final(String),
    /// One or more tool invocations, with optional accompanying text
    ToolCalls {
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
}

/// One normalized model round
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub reply: ModelReply,
    /// Usage reported by the provider, if any
    pub usage: Option<TokenUsage>,
    /// Model that produced the reply
    pub model: String,
    /// Raw text as returned by the provider
    pub raw: String,
}

impl ModelResponse {
    /// A final text answer
    pub fn final_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            raw: text.clone(),
            reply: ModelReply::Final(text),
            usage: None,
            model: String::new(),
        }
    }

    /// A round that only requests tools
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            raw: serde_json::to_string(&calls).unwrap_or_default(),
            reply: ModelReply::ToolCalls {
                content: None,
                calls,
            },
            usage: None,
            model: String::new(),
        }
    }

    /// Attach reported usage
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Set the model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// A model as seen by the agent loop
///
/// Implementations differ in whether the provider understands tool schemas
/// natively or tools have to be coached through the prompt.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logs
    fn model_name(&self) -> &str;

    /// Whether tool schemas are sent to the provider as structured data
    fn supports_native_tool_calling(&self) -> bool;

    /// Render tool definitions in the format this model consumes
    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<Value>;

    /// Compose the system message for a run
    fn build_system_prompt(
        &self,
        tools: &[ToolDefinition],
        output: Option<&OutputSchema>,
        instructions: Option<&str>,
    ) -> String;

    /// Run one round against the transcript
    ///
    /// Transport failures are returned unchanged. A reply from which neither
    /// a final answer nor a tool call can be recovered is
    /// [`TenxError::MalformedResponse`](crate::core::TenxError::MalformedResponse).
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        metadata: &Metadata,
    ) -> Result<ModelResponse>;
}
