//! Native tool calling
//!
//! Tool schemas are sent to the provider in OpenAI function format and tool
//! calls come back as structured data.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::{Message, Metadata, Result, TenxError, ToolCall, ToolDefinition};
use crate::llm::prompt;
use crate::llm::traits::{
    GenerateOptions, LLMProvider, LLMResponse, LanguageModel, ModelReply, ModelResponse,
};
use crate::output::OutputSchema;

/// Issues `call_N` ids for calls the provider left unnamed
#[derive(Debug, Default)]
pub(crate) struct CallIds(AtomicU64);

impl CallIds {
    pub(crate) fn next(&self) -> String {
        format!("call_{}", self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Replace empty or repeated ids so every call in a turn is addressable
    pub(crate) fn fill(&self, calls: &mut [ToolCall]) {
        let mut seen = HashSet::new();
        for call in calls {
            if call.id.trim().is_empty() || !seen.insert(call.id.clone()) {
                call.id = self.next();
                seen.insert(call.id.clone());
            }
        }
    }
}

/// Model whose provider understands tool schemas
pub struct NativeToolModel {
    provider: Arc<dyn LLMProvider>,
    model: String,
    options: GenerateOptions,
    ids: CallIds,
}

impl NativeToolModel {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            options: GenerateOptions::default(),
            ids: CallIds::default(),
        }
    }

    /// Default generation options, overridable per run through metadata
    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    fn normalize(&self, response: LLMResponse) -> Result<ModelResponse> {
        let LLMResponse {
            content,
            mut tool_calls,
            usage,
            model,
        } = response;

        let reply = if !tool_calls.is_empty() {
            self.ids.fill(&mut tool_calls);
            ModelReply::ToolCalls {
                content: Some(content.clone()).filter(|c| !c.trim().is_empty()),
                calls: tool_calls,
            }
        } else if content.trim().is_empty() {
            return Err(TenxError::malformed(0, &content).with_usage(usage.unwrap_or_default()));
        } else {
            ModelReply::Final(content.clone())
        };

        // tool-only rounds have no text; keep the calls as the raw reply
        let raw = match &reply {
            ModelReply::ToolCalls { calls, .. } if content.trim().is_empty() => {
                serde_json::to_string(calls).unwrap_or_default()
            }
            _ => content,
        };

        Ok(ModelResponse {
            reply,
            usage,
            model,
            raw,
        })
    }
}

#[async_trait]
impl LanguageModel for NativeToolModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_native_tool_calling(&self) -> bool {
        true
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect()
    }

    fn build_system_prompt(
        &self,
        tools: &[ToolDefinition],
        output: Option<&OutputSchema>,
        instructions: Option<&str>,
    ) -> String {
        prompt::compose(instructions, prompt::native_tool_section(tools), output)
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        metadata: &Metadata,
    ) -> Result<ModelResponse> {
        let options = Some(self.options.with_metadata(metadata));
        let response = if tools.is_empty() {
            self.provider.chat(&self.model, messages, options).await?
        } else {
            let specs = self.convert_tools(tools);
            self.provider
                .chat_with_tools(&self.model, messages, &specs, options)
                .await?
        };
        self.normalize(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TokenUsage;
    use crate::llm::mock::ScriptedProvider;

    fn calculator() -> ToolDefinition {
        ToolDefinition::new("calculator", "Evaluate arithmetic", json!({"type": "object"}))
    }

    #[test]
    fn test_convert_tools_uses_function_format() {
        let provider = Arc::new(ScriptedProvider::new());
        let model = NativeToolModel::new(provider, "gpt-4o-mini");
        let specs = model.convert_tools(&[calculator()]);
        assert_eq!(specs[0]["type"], "function");
        assert_eq!(specs[0]["function"]["name"], "calculator");
    }

    #[test]
    fn test_fill_ids() {
        let ids = CallIds::default();
        let mut calls = vec![
            ToolCall::new("", "a", json!({})),
            ToolCall::new("x", "b", json!({})),
            ToolCall::new("x", "c", json!({})),
        ];
        ids.fill(&mut calls);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[1].id, "x");
        assert_eq!(calls[2].id, "call_2");
    }

    #[tokio::test]
    async fn test_complete_sends_tools_and_reads_calls() {
        let provider = Arc::new(ScriptedProvider::new().then(LLMResponse {
            content: String::new(),
            tool_calls: vec![ToolCall::new("", "calculator", json!({"expression": "1+1"}))],
            usage: Some(TokenUsage::new(10, 2)),
            model: "gpt-4o-mini".into(),
        }));
        let model = NativeToolModel::new(provider.clone(), "gpt-4o-mini");

        let response = model
            .complete(&[Message::user("1+1?")], &[calculator()], &Metadata::new())
            .await
            .unwrap();

        // no text came back, so the raw reply is the calls themselves
        assert!(response.raw.contains("\"calculator\""));
        match response.reply {
            ModelReply::ToolCalls { content, calls } => {
                assert!(content.is_none());
                assert_eq!(calls[0].id, "call_1");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(provider.requests()[0].tools.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_reply_is_malformed() {
        let provider = Arc::new(ScriptedProvider::new().then(LLMResponse {
            usage: Some(TokenUsage::new(4, 0)),
            ..Default::default()
        }));
        let model = NativeToolModel::new(provider, "m");
        let err = model
            .complete(&[Message::user("hi")], &[], &Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TenxError::MalformedResponse { .. }));
        assert_eq!(err.usage(), Some(TokenUsage::new(4, 0)));
    }

    #[tokio::test]
    async fn test_metadata_reaches_provider_options() {
        let provider = Arc::new(ScriptedProvider::new().then_text("hello"));
        let model = NativeToolModel::new(provider.clone(), "m");
        model
            .complete(
                &[Message::user("hi")],
                &[],
                &Metadata::new().with("seed", 11).with("user", "alice"),
            )
            .await
            .unwrap();
        let options = provider.requests()[0].options.clone().unwrap_or_default();
        assert_eq!(options.seed, Some(11));
        assert_eq!(options.user.as_deref(), Some("alice"));
    }
}
