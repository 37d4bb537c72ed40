//! Sub-agent support
//!
//! Wraps an [`Agent`] as a [`Tool`] so a parent agent can delegate a query to
//! it. The nested run gets its own OS thread and single-threaded runtime;
//! only the tool call that spawned it waits on the result.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::agent::orchestrator::{Agent, AgentResponse, RunRequest};
use crate::core::{Metadata, Result, TenxError, ToolError};
use crate::tools::{Tool, ToolOutput};

/// A nested agent exposed as a single-argument tool
pub struct AgentTool {
    agent: Arc<Agent>,
    name: String,
    description: String,
}

impl AgentTool {
    pub fn new(agent: Arc<Agent>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            agent,
            name: name.into(),
            description: description.into(),
        }
    }

    /// The wrapped agent
    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The question or task to hand to this agent"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value, metadata: &Metadata) -> std::result::Result<ToolOutput, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::invalid_arguments(&self.name, "missing 'query' argument"))?;

        // fresh counters and no stored history for the nested run
        let request = RunRequest::new(query)
            .metadata(metadata.for_nested_call())
            .history(Vec::new());

        let response = run_isolated(Arc::clone(&self.agent), request)
            .await
            .map_err(|e| {
                let err = ToolError::execution(&self.name, &e);
                match e.usage() {
                    Some(spent) => err.with_usage(spent),
                    None => err,
                }
            })?;

        tracing::debug!(
            tool = %self.name,
            total_tokens = response.metadata.usage.total_tokens,
            "nested agent finished"
        );
        Ok(ToolOutput::text(response.text()).with_usage(response.metadata.usage))
    }
}

/// Run an agent on a dedicated thread with its own current-thread runtime
pub async fn run_isolated(agent: Arc<Agent>, request: RunRequest) -> Result<AgentResponse> {
    let (tx, rx) = oneshot::channel();
    let span = tracing::Span::current();

    std::thread::Builder::new()
        .name(format!("tenx-{}", agent.name()))
        .spawn(move || {
            let result = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(TenxError::from)
                .and_then(|runtime| runtime.block_on(agent.run(request).instrument(span)));
            let _ = tx.send(result);
        })?;

    rx.await.map_err(|_| {
        TenxError::NestedAgent("nested agent thread ended without a result".to_string())
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TokenUsage;
    use crate::llm::ScriptedModel;

    fn nested(reply: &str) -> Arc<Agent> {
        let model = Arc::new(ScriptedModel::new().then_reply(reply, TokenUsage::new(100, 50)));
        Arc::new(Agent::builder(model).name("helper").build().unwrap())
    }

    #[tokio::test]
    async fn test_agent_tool_reports_nested_usage() {
        let tool = AgentTool::new(nested("Paris"), "geography", "Answers geography questions");
        let out = tool
            .execute(json!({"query": "Capital of France?"}), &Metadata::new().with("user", "u1"))
            .await
            .unwrap();
        assert_eq!(out.content, "Paris");
        assert_eq!(out.usage, Some(TokenUsage::new(100, 50)));
        assert!(tool.agent().history().session_ids().is_empty());
    }

    #[tokio::test]
    async fn test_agent_tool_requires_query() {
        let tool = AgentTool::new(nested("x"), "helper", "Helps");
        let err = tool.execute(json!({}), &Metadata::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_nested_failure_is_a_tool_error() {
        let model = Arc::new(ScriptedModel::new().then_error(TenxError::provider("down")));
        let agent = Arc::new(Agent::builder(model).build().unwrap());
        let tool = AgentTool::new(agent, "helper", "Helps");
        let err = tool
            .execute(json!({"query": "q"}), &Metadata::new())
            .await
            .unwrap_err();
        assert_eq!(err.tool_name(), "helper");
        assert!(err.to_string().contains("down"));
    }

    #[tokio::test]
    async fn test_failed_nested_run_reports_spent_tokens() {
        let model = Arc::new(
            ScriptedModel::new()
                .then_reply(r#"{"wrong": true}"#, TokenUsage::new(200, 100)),
        );
        let schema = crate::output::OutputSchema::from_json(
            "Answer",
            json!({"type": "object", "required": ["answer"]}),
        );
        let agent = Arc::new(Agent::builder(model).output_schema(schema).build().unwrap());
        let tool = AgentTool::new(agent, "helper", "Helps");
        let err = tool
            .execute(json!({"query": "q"}), &Metadata::new())
            .await
            .unwrap_err();
        assert_eq!(err.usage(), Some(TokenUsage::new(200, 100)));
    }

    #[test]
    fn test_parameters_schema() {
        let tool = AgentTool::new(nested("x"), "helper", "Helps");
        assert_eq!(tool.parameters_schema()["required"][0], "query");
    }
}
