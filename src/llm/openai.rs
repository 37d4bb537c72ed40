//! OpenAI-compatible chat completions client
//!
//! Talks to `/chat/completions` on any server implementing the OpenAI wire
//! format, including Ollama's `/v1` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::core::error::excerpt;
use crate::core::{
    Message, ProviderConfig, Result, Role, TenxError, TokenUsage, ToolCall,
};
use crate::llm::traits::{GenerateOptions, LLMProvider, LLMResponse};

/// OpenAI API client
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

/// Chat completions request
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
}

/// Message in OpenAI wire format
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

/// Tool call in OpenAI wire format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunction,
}

/// Function in a tool call; arguments travel as a JSON string
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

/// Chat completions response
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
}

impl OpenAiClient {
    /// Create a client from provider configuration
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Convert internal Message to wire format
    fn to_wire_message(msg: &Message) -> WireMessage {
        let tool_calls = msg.has_tool_calls().then(|| {
            msg.tool_calls
                .iter()
                .map(|tc| WireToolCall {
                    id: tc.id.clone(),
                    kind: function_type(),
                    function: WireFunction {
                        name: tc.name.clone(),
                        arguments: tc.arguments.to_string(),
                    },
                })
                .collect()
        });

        WireMessage {
            role: msg.role.to_string(),
            content: msg.content.clone(),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }

    /// Convert a wire response to LLMResponse
    fn to_llm_response(response: ChatResponse) -> Result<LLMResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TenxError::provider("response contained no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall::new(tc.id, tc.function.name, parse_arguments(&tc.function.arguments)))
            .collect();

        let usage = response.usage.map(|u| {
            let mut usage = TokenUsage::new(u.prompt_tokens, u.completion_tokens);
            if let Some(total) = u.total_tokens {
                usage.total_tokens = total;
            }
            usage
        });

        Ok(LLMResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage,
            model: response.model,
        })
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<LLMResponse> {
        let request_json = serde_json::to_string(request)?;
        tracing::debug!(request = %excerpt(&request_json), "chat completion request");

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() {
                TenxError::provider(format!("Cannot connect to {}", self.base_url))
            } else {
                TenxError::from(e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TenxError::provider(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        let response_text = response.text().await?;
        tracing::debug!(response = %excerpt(&response_text), "chat completion response");

        let chat_response: ChatResponse = serde_json::from_str(&response_text)
            .map_err(|e| TenxError::provider(format!("Failed to parse response: {}", e)))?;

        Self::to_llm_response(chat_response)
    }

    fn request<'a>(
        model: &'a str,
        messages: &[Message],
        tools: Option<&'a [Value]>,
        options: Option<GenerateOptions>,
    ) -> ChatRequest<'a> {
        let options = options.unwrap_or_default();
        ChatRequest {
            model,
            messages: messages.iter().map(Self::to_wire_message).collect(),
            tools,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stop: options.stop,
            seed: options.seed,
            user: options.user,
        }
    }
}

/// Decode stringified arguments; blank means no arguments
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[async_trait]
impl LLMProvider for OpenAiClient {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        self.send(&Self::request(model, messages, None, options)).await
    }

    async fn chat_with_tools(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Value],
        options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        let tools = (!tools.is_empty()).then_some(tools);
        self.send(&Self::request(model, messages, tools, options)).await
    }

    fn name(&self) -> &str {
        "openai"
    }
}
