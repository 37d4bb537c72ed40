//! Prompted tool calling for models without native support
//!
//! Tools are described in the system prompt together with a JSON envelope,
//! `{"tool_calls": [{"name": ..., "arguments": {...}}]}`, and calls are parsed
//! back out of the model's free text. The transport only ever sees plain
//! system/user/assistant messages.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::core::{Message, Metadata, Result, Role, TenxError, ToolCall, ToolDefinition};
use crate::llm::native::CallIds;
use crate::llm::prompt;
use crate::llm::traits::{GenerateOptions, LLMProvider, LanguageModel, ModelReply, ModelResponse};
use crate::output::OutputSchema;

/// Model that is coached into tool use through its prompt
pub struct ManualToolModel {
    provider: Arc<dyn LLMProvider>,
    model: String,
    options: GenerateOptions,
    ids: CallIds,
}

impl ManualToolModel {
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
}

#[async_trait]
impl LanguageModel for ManualToolModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_native_tool_calling(&self) -> bool {
        false
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
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
        prompt::compose(instructions, prompt::manual_tool_section(tools), output)
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        metadata: &Metadata,
    ) -> Result<ModelResponse> {
        let rendered = render_messages(messages);
        let options = Some(self.options.with_metadata(metadata));
        let response = self.provider.chat(&self.model, &rendered, options).await?;

        let known: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        let reply = parse_reply(&response.content, &known, &self.ids)
            .map_err(|e| e.with_usage(response.usage.unwrap_or_default()))?;

        Ok(ModelResponse {
            reply,
            usage: response.usage,
            model: response.model,
            raw: response.content,
        })
    }
}

/// Flatten tool turns into plain text the transport can carry
pub fn render_messages(messages: &[Message]) -> Vec<Message> {
    let mut names: HashMap<&str, &str> = HashMap::new();
    let mut rendered = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::Assistant if msg.has_tool_calls() => {
                for call in &msg.tool_calls {
                    names.insert(call.id.as_str(), call.name.as_str());
                }
                let envelope = json!({
                    "tool_calls": msg
                        .tool_calls
                        .iter()
                        .map(|c| json!({"name": c.name, "arguments": c.arguments}))
                        .collect::<Vec<_>>()
                });
                let text = match msg.content.as_deref() {
                    Some(content) => format!("{content}\n{envelope}"),
                    None => envelope.to_string(),
                };
                rendered.push(Message::assistant(text));
            }
            Role::Tool => {
                let id = msg.tool_call_id.as_deref().unwrap_or_default();
                let name = names.get(id).copied().unwrap_or("tool");
                rendered.push(Message::user(format!(
                    "Tool result for {id} ({name}): {}",
                    msg.content_str()
                )));
            }
            _ => rendered.push(msg.clone()),
        }
    }

    rendered
}

/// Recover a final answer or tool calls from free text
///
/// `known_tools` lets a bare `{"name": ..., "arguments": ...}` object count as
/// a call when it names a registered tool.
pub(crate) fn parse_reply(text: &str, known_tools: &[&str], ids: &CallIds) -> Result<ModelReply> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(TenxError::malformed(0, text));
    }

    let Some((value, prefix)) = find_json_object(trimmed) else {
        // a broken envelope, not prose that merely names the key
        if trimmed.contains("\"tool_calls\"") && trimmed.contains('{') {
            return Err(TenxError::malformed(0, text));
        }
        return Ok(ModelReply::Final(trimmed.to_string()));
    };

    if let Some(items) = value.get("tool_calls") {
        let mut calls: Vec<ToolCall> = items
            .as_array()
            .map(|items| items.iter().filter_map(|item| parse_call(item, ids)).collect())
            .unwrap_or_default();
        if calls.is_empty() {
            return Err(TenxError::malformed(0, text));
        }
        ids.fill(&mut calls);
        return Ok(ModelReply::ToolCalls {
            content: prefix,
            calls,
        });
    }

    let names_known_tool = value
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|name| known_tools.contains(&name));
    if names_known_tool && (value.get("arguments").is_some() || value.get("parameters").is_some())
    {
        if let Some(call) = parse_call(&value, ids) {
            let mut calls = vec![call];
            ids.fill(&mut calls);
            return Ok(ModelReply::ToolCalls {
                content: prefix,
                calls,
            });
        }
    }

    Ok(ModelReply::Final(trimmed.to_string()))
}

/// Locate a JSON object in the text, returning it with any leading prose
fn find_json_object(text: &str) -> Option<(Value, Option<String>)> {
    let unfenced = strip_fences(text);
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(unfenced) {
        return Some((value, None));
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
    if !value.is_object() {
        return None;
    }
    let prefix = strip_fences(&text[..start])
        .trim_end_matches("```json")
        .trim_end_matches("```")
        .trim()
        .to_string();
    Some((value, Some(prefix).filter(|p| !p.is_empty())))
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// One envelope item; accepts OpenAI-style nested `function` objects and
/// stringified arguments
fn parse_call(item: &Value, ids: &CallIds) -> Option<ToolCall> {
    let source = item.get("function").filter(|f| f.is_object()).unwrap_or(item);
    let name = source.get("name").and_then(Value::as_str)?.trim();
    if name.is_empty() {
        return None;
    }

    let arguments = match source.get("arguments").or_else(|| source.get("parameters")) {
        Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or_else(|_| {
            // keep the raw text so the executor reports an argument error
            Value::String(raw.clone())
        }),
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(other) => other.clone(),
    };

    let id = item
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| ids.next());

    Some(ToolCall::new(id, name, arguments))
}
