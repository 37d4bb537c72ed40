//! Shared types used across tenx modules
//!
//! Contains the message model, tool call records and tool definitions. The
//! serialized form of [`Message`] is the wire shape used both for history and
//! for provider requests.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::core::error::{Result, TenxError};

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions synthesized for the model
    System,
    /// The caller's query
    User,
    /// Model output, either text or tool calls
    Assistant,
    /// Result of one tool call
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Text content, absent for assistant turns that only carry tool calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The call this tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Create an assistant message carrying tool calls
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.filter(|c| !c.trim().is_empty()),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Create a tool result message answering `tool_call_id`
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Content as a string slice, empty when absent
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    /// Whether this is an assistant message requesting tools
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Check the invariants that hold for a message on its own
    pub fn validate(&self) -> Result<()> {
        if self.role != Role::Assistant && !self.tool_calls.is_empty() {
            return Err(TenxError::invalid_message(format!(
                "{} message cannot carry tool calls",
                self.role
            )));
        }

        match self.role {
            Role::Assistant => {
                let has_text = self
                    .content
                    .as_deref()
                    .is_some_and(|c| !c.trim().is_empty());
                if !has_text && self.tool_calls.is_empty() {
                    return Err(TenxError::invalid_message(
                        "assistant message has neither content nor tool calls",
                    ));
                }
                let mut seen = HashSet::new();
                for call in &self.tool_calls {
                    if call.id.is_empty() {
                        return Err(TenxError::invalid_message(format!(
                            "tool call '{}' has an empty id",
                            call.name
                        )));
                    }
                    if call.name.is_empty() {
                        return Err(TenxError::invalid_message(format!(
                            "tool call '{}' has an empty name",
                            call.id
                        )));
                    }
                    if !seen.insert(call.id.as_str()) {
                        return Err(TenxError::invalid_message(format!(
                            "duplicate tool call id '{}'",
                            call.id
                        )));
                    }
                }
            }
            Role::Tool => {
                if self.tool_call_id.as_deref().map_or(true, str::is_empty) {
                    return Err(TenxError::invalid_message(
                        "tool message is missing its tool_call_id",
                    ));
                }
            }
            Role::System | Role::User => {}
        }

        if self.role != Role::Tool && self.tool_call_id.is_some() {
            return Err(TenxError::invalid_message(format!(
                "{} message cannot carry a tool_call_id",
                self.role
            )));
        }

        Ok(())
    }
}

/// A tool call made by the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique id within the owning assistant message
    pub id: String,
    /// Name of the tool to invoke
    pub name: String,
    /// JSON arguments for the tool
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Get a string argument by key
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

/// Definition of a tool that can be called by the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Name of the tool
    pub name: String,
    /// Description of what the tool does
    pub description: String,
    /// JSON Schema for the parameters
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Tracks which issued tool calls still await their tool message
#[derive(Debug, Clone, Default)]
pub struct PendingCalls {
    ids: VecDeque<String>,
}

impl PendingCalls {
    /// Check `message` against the outstanding calls and record its effect
    pub fn accept(&mut self, message: &Message) -> Result<()> {
        message.validate()?;

        match message.role {
            Role::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                match self.ids.front() {
                    Some(expected) if expected == id => {
                        self.ids.pop_front();
                        Ok(())
                    }
                    Some(expected) => Err(TenxError::invalid_message(format!(
                        "tool message answers '{id}' but '{expected}' is next"
                    ))),
                    None => Err(TenxError::invalid_message(format!(
                        "tool message answers '{id}' which was never issued or is already answered"
                    ))),
                }
            }
            _ if !self.ids.is_empty() => Err(TenxError::invalid_message(format!(
                "{} message while {} tool call(s) are unanswered",
                message.role,
                self.ids.len()
            ))),
            Role::Assistant => {
                self.ids
                    .extend(message.tool_calls.iter().map(|call| call.id.clone()));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Whether every issued call has been answered
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Check a whole transcript for message and tool-pairing invariants
///
/// A transcript may end with unanswered calls; only ordering is checked.
pub fn validate_transcript(messages: &[Message]) -> Result<()> {
    let mut pending = PendingCalls::default();
    for message in messages {
        pending.accept(message)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape_skips_absent_fields() {
        let msg = Message::user("Hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "Hello"}));

        let call = ToolCall::new("call_1", "calculator", json!({"expression": "1+1"}));
        let msg = Message::assistant_with_tools(None, vec![call]);
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("content").is_none());
        assert_eq!(value["tool_calls"][0]["id"], "call_1");
    }

    #[test]
    fn test_assistant_needs_content_or_calls() {
        assert!(Message::assistant_with_tools(Some("  ".into()), vec![])
            .validate()
            .is_err());
        assert!(Message::assistant("done").validate().is_ok());
    }

    #[test]
    fn test_duplicate_call_ids_rejected() {
        let msg = Message::assistant_with_tools(
            None,
            vec![
                ToolCall::new("a", "t", json!({})),
                ToolCall::new("a", "t", json!({})),
            ],
        );
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_transcript_pairs_calls_in_order() {
        let assistant = Message::assistant_with_tools(
            None,
            vec![
                ToolCall::new("a", "t", json!({})),
                ToolCall::new("b", "t", json!({})),
            ],
        );
        let ok = vec![
            Message::system("s"),
            Message::user("q"),
            assistant.clone(),
            Message::tool("a", "1"),
            Message::tool("b", "2"),
            Message::assistant("done"),
        ];
        assert!(validate_transcript(&ok).is_ok());

        let out_of_order = vec![assistant.clone(), Message::tool("b", "2")];
        assert!(validate_transcript(&out_of_order).is_err());

        let answered_twice = vec![
            assistant.clone(),
            Message::tool("a", "1"),
            Message::tool("b", "2"),
            Message::tool("a", "again"),
        ];
        assert!(validate_transcript(&answered_twice).is_err());

        let interrupted = vec![assistant, Message::tool("a", "1"), Message::user("hi")];
        assert!(validate_transcript(&interrupted).is_err());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Tool.to_string(), "tool");
    }
}
