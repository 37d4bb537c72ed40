//! Tool executor - runs one turn's tool calls
//!
//! All calls of a turn are issued concurrently and awaited together.
//! Outcomes come back in the order the calls were issued, whatever order
//! they finish in. A failing call becomes error content for the model;
//! nothing raised by a tool escapes this module.

use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::core::{Metadata, TokenUsage, ToolCall, ToolError};
use crate::output::validate::{format_violations, validate};
use crate::tools::registry::{ToolOutput, ToolRegistry};

/// Result of one tool call, ready to become a tool message
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// Id of the call this answers
    pub call_id: String,
    /// Tool that was called
    pub tool_name: String,
    /// Tool output, or the error rendered as text
    pub content: String,
    /// Whether the tool succeeded
    pub success: bool,
    /// Tokens spent inside the tool, whether or not it succeeded
    pub usage: Option<TokenUsage>,
}

impl ToolOutcome {
    fn from_result(call: &ToolCall, result: Result<ToolOutput, ToolError>) -> Self {
        match result {
            Ok(output) => Self {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content: output.content,
                success: true,
                usage: output.usage,
            },
            Err(err) => Self {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content: format!("Error: {err}"),
                success: false,
                usage: err.usage(),
            },
        }
    }
}

/// Dispatches tool calls against a registry
#[derive(Debug, Clone, Default)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Option<Duration>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            timeout: None,
        }
    }

    /// Bound each call; a call that runs longer becomes a timeout error
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute every call of one assistant turn
    pub async fn execute_all(&self, calls: &[ToolCall], metadata: &Metadata) -> Vec<ToolOutcome> {
        join_all(calls.iter().map(|call| self.execute_one(call, metadata))).await
    }

    async fn execute_one(&self, call: &ToolCall, metadata: &Metadata) -> ToolOutcome {
        let started = Instant::now();
        let result = self.dispatch(call, metadata).await;
        let outcome = ToolOutcome::from_result(call, result);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if outcome.success {
            tracing::info!(
                tool = %call.name,
                call_id = %call.id,
                elapsed_ms,
                output_len = outcome.content.len(),
                "tool call completed"
            );
        } else {
            tracing::warn!(
                tool = %call.name,
                call_id = %call.id,
                elapsed_ms,
                error = %outcome.content,
                "tool call failed"
            );
        }
        outcome
    }

    async fn dispatch(&self, call: &ToolCall, metadata: &Metadata) -> Result<ToolOutput, ToolError> {
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let violations = validate(&call.arguments, &tool.parameters_schema());
        if !violations.is_empty() {
            return Err(ToolError::invalid_arguments(
                &call.name,
                format_violations(&violations),
            ));
        }

        let run = tool.execute(call.arguments.clone(), metadata);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .unwrap_or_else(|_| {
                    Err(ToolError::Timeout {
                        tool: call.name.clone(),
                        secs: limit.as_secs(),
                    })
                }),
            None => run.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::calculator::CalculatorTool;
    use crate::tools::registry::Tool;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;

    /// Sleeps for `ms` milliseconds, then answers with its own name
    struct Slow {
        name: &'static str,
        ms: u64,
    }

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Wait, then answer"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _arguments: Value, _metadata: &Metadata) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_millis(self.ms)).await;
            Ok(ToolOutput::text(self.name).with_usage(TokenUsage::new(1, 1)))
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CalculatorTool)).unwrap();
        registry.register(Arc::new(Slow { name: "slow", ms: 80 })).unwrap();
        registry.register(Arc::new(Slow { name: "fast", ms: 1 })).unwrap();
        ToolExecutor::new(registry)
    }

    #[tokio::test]
    async fn test_outcomes_follow_issuance_order() {
        let calls = vec![
            ToolCall::new("a", "slow", json!({})),
            ToolCall::new("b", "fast", json!({})),
        ];
        let outcomes = executor().execute_all(&calls, &Metadata::new()).await;
        let ids: Vec<&str> = outcomes.iter().map(|o| o.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(outcomes[0].content, "slow");
        assert_eq!(outcomes[1].usage, Some(TokenUsage::new(1, 1)));
    }

    #[tokio::test]
    async fn test_calls_run_concurrently() {
        let calls = vec![
            ToolCall::new("a", "slow", json!({})),
            ToolCall::new("b", "slow", json!({})),
            ToolCall::new("c", "slow", json!({})),
        ];
        let started = Instant::now();
        executor().execute_all(&calls, &Metadata::new()).await;
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_failures_become_content() {
        let calls = vec![
            ToolCall::new("1", "calculator", json!({"expression": "2+2"})),
            ToolCall::new("2", "calculator", json!({"expression": "1/0"})),
            ToolCall::new("3", "nope", json!({})),
            ToolCall::new("4", "calculator", json!({"expr": "1"})),
        ];
        let outcomes = executor().execute_all(&calls, &Metadata::new()).await;
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].content, "4");

        assert!(!outcomes[1].success);
        assert!(outcomes[1].content.starts_with("Error:"));
        assert!(outcomes[1].content.contains("division by zero"));

        assert!(outcomes[2].content.contains("Unknown tool 'nope'"));
        assert!(outcomes[3].content.contains("Invalid arguments for tool 'calculator'"));
    }

    struct Spender;

    #[async_trait]
    impl Tool for Spender {
        fn name(&self) -> &str {
            "spender"
        }

        fn description(&self) -> &str {
            "Spends tokens, then fails"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _arguments: Value, _metadata: &Metadata) -> Result<ToolOutput, ToolError> {
            Err(ToolError::execution("spender", "gave up").with_usage(TokenUsage::new(30, 3)))
        }
    }

    #[tokio::test]
    async fn test_failed_call_keeps_its_usage() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Spender)).unwrap();
        let outcomes = ToolExecutor::new(registry)
            .execute_all(&[ToolCall::new("s", "spender", json!({}))], &Metadata::new())
            .await;
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].usage, Some(TokenUsage::new(30, 3)));
    }

    #[tokio::test]
    async fn test_timeout_becomes_content() {
        let executor = executor().with_timeout(Some(Duration::from_millis(10)));
        let outcomes = executor
            .execute_all(&[ToolCall::new("t", "slow", json!({}))], &Metadata::new())
            .await;
        assert!(!outcomes[0].success);
        assert!(outcomes[0].content.contains("timed out"));
    }
}
