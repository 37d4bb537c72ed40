//! Tool registry - the set of tools an agent may call
//!
//! Tools keep their registration order so the model always sees them listed
//! the same way.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{Metadata, Result, TenxError, TokenUsage, ToolDefinition, ToolError};

/// What a tool hands back to the agent loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// Text placed in the tool message
    pub content: String,
    /// Tokens spent inside the tool, summed into the caller's counters
    pub usage: Option<TokenUsage>,
}

impl ToolOutput {
    /// Plain text result
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }

    /// Attach usage spent while producing the result
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A capability the model can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model calls the tool by
    fn name(&self) -> &str;

    /// What the tool does, shown to the model
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object
    fn parameters_schema(&self) -> Value;

    /// Run the tool
    ///
    /// `metadata` is the caller's run metadata, read-only.
    async fn execute(&self, arguments: Value, metadata: &Metadata) -> std::result::Result<ToolOutput, ToolError>;

    /// Definition advertised to the model
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters_schema())
    }
}

/// Registry of available tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    /// Tools in registration order
    tools: Vec<Arc<dyn Tool>>,
    /// Position of each tool indexed by name
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; names must be unique
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if name.trim().is_empty() {
            return Err(TenxError::config("tool name must not be empty"));
        }
        if self.index.contains_key(&name) {
            return Err(TenxError::config(format!(
                "tool '{name}' is already registered"
            )));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    /// Whether a tool is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Get all tool definitions, in registration order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// Registered tool names, in registration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "Echo the input back"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(
            &self,
            arguments: Value,
            _metadata: &Metadata,
        ) -> std::result::Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(arguments["text"].as_str().unwrap_or_default()))
        }
    }

    #[test]
    fn test_registration_order_is_kept() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo("zeta"))).unwrap();
        registry.register(Arc::new(Echo("alpha"))).unwrap();
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo("echo"))).unwrap();
        assert!(matches!(
            registry.register(Arc::new(Echo("echo"))),
            Err(TenxError::Config(_))
        ));
        assert!(registry.register(Arc::new(Echo(""))).is_err());
    }

    #[tokio::test]
    async fn test_lookup_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo("echo"))).unwrap();
        let tool = registry.get("echo").unwrap();
        let out = tool
            .execute(json!({"text": "hi"}), &Metadata::new())
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::text("hi"));
        assert!(registry.get("missing").is_none());
    }
}
