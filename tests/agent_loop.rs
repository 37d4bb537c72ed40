//! Agent loop integration tests
//!
//! Drive full runs against scripted models; no network access.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

use tenx::agent::DEFAULT_SESSION;
use tenx::core::{Role, ToolCall};
use tenx::llm::ScriptedModel;
use tenx::{
    Agent, CalculatorTool, Message, Metadata, RunRequest, SessionHistory, TenxError, TokenUsage,
    Tool, ToolError, ToolOutput,
};

/// Sleeps, then answers with a fixed label
struct Delayed {
    name: &'static str,
    ms: u64,
}

#[async_trait]
impl Tool for Delayed {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Answers after a delay"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Value, _metadata: &Metadata) -> Result<ToolOutput, ToolError> {
        tokio::time::sleep(Duration::from_millis(self.ms)).await;
        Ok(ToolOutput::text(format!("{} done", self.name)))
    }
}

/// Reports the caller's `user` metadata key
struct WhoAmI;

#[async_trait]
impl Tool for WhoAmI {
    fn name(&self) -> &str {
        "whoami"
    }

    fn description(&self) -> &str {
        "Returns the current user"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _arguments: Value, metadata: &Metadata) -> Result<ToolOutput, ToolError> {
        metadata
            .get_str("user")
            .map(ToolOutput::text)
            .ok_or_else(|| ToolError::execution("whoami", "no user in metadata"))
    }
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall::new(id, name, arguments)
}

fn roles(messages: &[Message]) -> Vec<Role> {
    messages.iter().map(|m| m.role).collect()
}

#[tokio::test]
async fn test_system_message_first_and_inserted_once() {
    let model = Arc::new(
        ScriptedModel::new()
            .then_reply("first", TokenUsage::new(5, 1))
            .then_reply("second", TokenUsage::new(9, 1)),
    );
    let agent = Agent::builder(model.clone())
        .system_prompt("You are terse.")
        .build()
        .unwrap();

    assert_ok!(agent.run(RunRequest::new("one").session("s")).await);
    assert_ok!(agent.run(RunRequest::new("two").session("s")).await);

    let stored = agent.history().read("s");
    assert_eq!(
        roles(&stored),
        vec![Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert!(stored[0].content_str().starts_with("You are terse."));
    assert_eq!(stored.iter().filter(|m| m.role == Role::System).count(), 1);

    // the second round sees the first exchange
    assert_eq!(model.transcripts()[1].len(), 4);
}

#[tokio::test]
async fn test_default_session_is_used_without_an_id() {
    let model = Arc::new(ScriptedModel::new().then_reply("hi", TokenUsage::default()));
    let agent = Agent::builder(model).build().unwrap();
    agent.run("hello").await.unwrap();
    assert_eq!(agent.history().session_ids(), vec![DEFAULT_SESSION]);
}

#[tokio::test]
async fn test_tool_messages_follow_issuance_order() {
    let model = Arc::new(
        ScriptedModel::new()
            .then_call(
                vec![
                    call("a", "slow", json!({})),
                    call("b", "fast", json!({})),
                ],
                TokenUsage::new(10, 4),
            )
            .then_reply("both done", TokenUsage::new(20, 3)),
    );
    let agent = Agent::builder(model.clone())
        .tool(Arc::new(Delayed { name: "slow", ms: 60 }))
        .tool(Arc::new(Delayed { name: "fast", ms: 1 }))
        .build()
        .unwrap();

    let response = agent.run("go").await.unwrap();
    assert_eq!(response.text(), "both done");

    let transcript = &model.transcripts()[1];
    let tool_messages: Vec<&Message> = transcript.iter().filter(|m| m.role == Role::Tool).collect();
    assert_eq!(tool_messages.len(), 2);
    assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("a"));
    assert_eq!(tool_messages[0].content_str(), "slow done");
    assert_eq!(tool_messages[1].tool_call_id.as_deref(), Some("b"));

    // assistant turn comes right before its results
    let assistant = &transcript[transcript.len() - 3];
    assert_eq!(assistant.role, Role::Assistant);
    assert_eq!(assistant.tool_calls.len(), 2);
}

#[tokio::test]
async fn test_second_of_two_calls_fails() {
    let model = Arc::new(
        ScriptedModel::new()
            .then_call(
                vec![
                    call("ok", "calculator", json!({"expression": "2 + 2"})),
                    call("bad", "calculator", json!({"expression": "1 / 0"})),
                ],
                TokenUsage::new(10, 4),
            )
            .then_reply("2+2 is 4; the other one is undefined", TokenUsage::new(30, 8)),
    );
    let agent = Agent::builder(model.clone())
        .tool(Arc::new(CalculatorTool))
        .build()
        .unwrap();

    let response = agent.run("compute both").await.unwrap();
    assert_eq!(response.llm_calls, 2);

    let transcript = &model.transcripts()[1];
    let results: Vec<&Message> = transcript.iter().filter(|m| m.role == Role::Tool).collect();
    assert_eq!(results[0].content_str(), "4");
    assert!(results[1].content_str().starts_with("Error:"));
    assert!(results[1].content_str().contains("division by zero"));
}

#[tokio::test]
async fn test_unknown_tool_does_not_abort_the_run() {
    let model = Arc::new(
        ScriptedModel::new()
            .then_call(vec![call("x", "teleport", json!({}))], TokenUsage::new(3, 1))
            .then_reply("I cannot teleport", TokenUsage::new(4, 1)),
    );
    let agent = Agent::builder(model.clone()).build().unwrap();

    let response = agent.run("beam me up").await.unwrap();
    assert_eq!(response.text(), "I cannot teleport");
    let last = model.transcripts()[1].last().cloned().unwrap();
    assert!(last.content_str().contains("Unknown tool 'teleport'"));
}

#[tokio::test]
async fn test_budget_exceeded() {
    let mut model = ScriptedModel::new();
    for i in 0..5 {
        model = model.then_call(
            vec![call(&format!("c{i}"), "calculator", json!({"expression": "1 + 1"}))],
            TokenUsage::new(1, 1),
        );
    }
    let model = Arc::new(model);
    let agent = Agent::builder(model.clone())
        .tool(Arc::new(CalculatorTool))
        .max_llm_calls(3)
        .build()
        .unwrap();

    let err = assert_err!(agent.run("loop forever").await);
    match &err {
        TenxError::BudgetExceeded { max_llm_calls, .. } => assert_eq!(*max_llm_calls, 3),
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.is_orchestration_failure());
    assert_eq!(model.calls(), 3);
    assert_eq!(model.remaining(), 2);
}

#[tokio::test]
async fn test_usage_accumulates_after_every_round() {
    let model = Arc::new(
        ScriptedModel::new()
            .then_call(
                vec![call("c1", "calculator", json!({"expression": "3 * 3"}))],
                TokenUsage::new(100, 10),
            )
            .then_reply("9", TokenUsage::new(120, 2)),
    );
    let agent = Agent::builder(model.clone())
        .tool(Arc::new(CalculatorTool))
        .build()
        .unwrap();

    let metadata = Metadata::new().with("request_id", "r-1");
    let response = agent
        .run(RunRequest::new("3*3").metadata(metadata))
        .await
        .unwrap();

    assert_eq!(response.usage(), TokenUsage::new(220, 12));
    assert_eq!(response.metadata.get_str("request_id"), Some("r-1"));

    // counters seen by the second round already include the first
    let seen = model.metadata_seen();
    assert_eq!(seen[0].usage.total_tokens, 0);
    assert_eq!(seen[1].usage.total_tokens, 110);
}

#[tokio::test]
async fn test_metadata_reaches_tools() {
    let model = Arc::new(
        ScriptedModel::new()
            .then_call(vec![call("w", "whoami", json!({}))], TokenUsage::default())
            .then_reply("you are ada", TokenUsage::default()),
    );
    let agent = Agent::builder(model.clone())
        .tool(Arc::new(WhoAmI))
        .build()
        .unwrap();

    agent
        .run(RunRequest::new("who am I?").metadata(Metadata::new().with("user", "ada")))
        .await
        .unwrap();
    let last = model.transcripts()[1].last().cloned().unwrap();
    assert_eq!(last.content_str(), "ada");
}

#[tokio::test]
async fn test_explicit_history_is_not_persisted() {
    let model = Arc::new(ScriptedModel::new().then_reply("blue", TokenUsage::new(40, 1)));
    let store = SessionHistory::new();
    let agent = Agent::builder(model.clone())
        .history(store.clone())
        .build()
        .unwrap();

    let history = vec![
        Message::user("My favourite colour is blue."),
        Message::assistant("Noted."),
        Message::user("And my cat is called Tom."),
        Message::assistant("Got it."),
    ];
    let response = agent
        .run(RunRequest::new("What is my favourite colour?").history(history))
        .await
        .unwrap();
    assert_eq!(response.text(), "blue");

    assert!(store.session_ids().is_empty());
    let seen = &model.transcripts()[0];
    assert_eq!(seen.len(), 6);
    assert_eq!(seen[0].role, Role::System);
    assert_eq!(seen[5].content_str(), "What is my favourite colour?");
}

#[tokio::test]
async fn test_explicit_history_leaves_the_named_session_alone() {
    let model = Arc::new(
        ScriptedModel::new()
            .then_reply("first", TokenUsage::new(5, 1))
            .then_reply("from history", TokenUsage::new(9, 1))
            .then_reply("second", TokenUsage::new(7, 1)),
    );
    let agent = Agent::builder(model.clone()).build().unwrap();

    agent.run(RunRequest::new("one").session("s")).await.unwrap();
    assert_eq!(agent.history().len("s"), 3);

    let history = vec![
        Message::user("a"),
        Message::assistant("b"),
        Message::user("c"),
        Message::assistant("d"),
    ];
    let response = agent
        .run(RunRequest::new("side question").session("s").history(history))
        .await
        .unwrap();
    assert_eq!(response.text(), "from history");
    // system + four supplied + query
    assert_eq!(model.transcripts()[1].len(), 6);
    assert_eq!(agent.history().len("s"), 3);

    agent.run(RunRequest::new("two").session("s")).await.unwrap();
    // the stored exchange plus the new query, nothing from the side run
    let seen = &model.transcripts()[2];
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(|m| m.content_str() != "side question"));
    assert_eq!(agent.history().len("s"), 5);
}

#[tokio::test]
async fn test_invalid_explicit_history_is_rejected() {
    let model = Arc::new(ScriptedModel::new().then_reply("unused", TokenUsage::default()));
    let agent = Agent::builder(model.clone()).build().unwrap();

    let history = vec![Message::user("q"), Message::tool("never-issued", "result")];
    let err = agent
        .run(RunRequest::new("next").history(history))
        .await
        .unwrap_err();
    assert!(matches!(err, TenxError::InvalidMessage(_)));
    assert_eq!(model.calls(), 0);
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
struct Answer {
    /// The final answer
    answer: String,
    /// How sure the model is, from 0 to 1
    confidence: f64,
}

#[tokio::test]
async fn test_structured_output_round_trip() {
    let model = Arc::new(ScriptedModel::new().then_reply(
        r#"{"answer": "4", "confidence": 0.95}"#,
        TokenUsage::new(50, 9),
    ));
    let agent = Agent::builder(model.clone())
        .output_type::<Answer>()
        .build()
        .unwrap();

    let response = agent.run("2+2?").await.unwrap();
    let answer: Answer = response.parse().unwrap();
    assert_eq!(
        answer,
        Answer {
            answer: "4".into(),
            confidence: 0.95
        }
    );

    let system = model.transcripts()[0][0].content_str().to_string();
    assert!(system.contains("`answer` (string, required): The final answer"));
    assert!(system.contains("`confidence`"));
}

#[tokio::test]
async fn test_missing_field_is_a_format_violation() {
    let model = Arc::new(ScriptedModel::new().then_reply(
        r#"{"answer": "4"}"#,
        TokenUsage::new(50, 5),
    ));
    let agent = Agent::builder(model).output_type::<Answer>().build().unwrap();

    let err = agent.run("2+2?").await.unwrap_err();
    match &err {
        TenxError::FormatViolation {
            iteration, detail, ..
        } => {
            assert_eq!(*iteration, 1);
            assert!(detail.contains("confidence"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.is_orchestration_failure());

    // the rejected answer is still part of the session
    let stored = agent.history().read(DEFAULT_SESSION);
    assert_eq!(stored.last().map(|m| m.content_str()), Some(r#"{"answer": "4"}"#));
}

#[tokio::test]
async fn test_concurrent_sessions_do_not_interleave() {
    let store = SessionHistory::new();
    let build = |reply: &str| {
        let model = Arc::new(
            ScriptedModel::new()
                .then_call(
                    vec![call("c", "slow", json!({}))],
                    TokenUsage::new(1, 1),
                )
                .then_reply(reply, TokenUsage::new(1, 1)),
        );
        Arc::new(
            Agent::builder(model)
                .tool(Arc::new(Delayed { name: "slow", ms: 20 }))
                .history(store.clone())
                .build()
                .unwrap(),
        )
    };
    let left = build("left");
    let right = build("right");

    let (a, b) = tokio::join!(
        left.run(RunRequest::new("l").session("left")),
        right.run(RunRequest::new("r").session("right")),
    );
    assert_ok!(a);
    assert_ok!(b);

    for session in ["left", "right"] {
        let stored = store.read(session);
        assert_eq!(
            roles(&stored),
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert!(tenx::core::validate_transcript(&stored).is_ok());
        assert_eq!(stored.last().map(|m| m.content_str()), Some(session));
    }
}
