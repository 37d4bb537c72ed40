//! tenx - tool-using LLM agent loop
//!
//! An agent sends a query to a language model, executes the tool calls the
//! model asks for, feeds the results back and repeats until the model gives
//! a final answer, optionally validated against a JSON schema.
//!
//! # Architecture
//!
//! - **Core**: Message model, metadata and token counters, configuration, errors
//! - **LLM**: Transport abstraction, OpenAI-compatible client, native and prompted tool calling
//! - **Tools**: Tool trait, registry, concurrent executor and a calculator
//! - **Output**: Output schemas and JSON Schema validation
//! - **Agent**: The orchestration loop, session history and agent-as-tool
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenx::{Agent, CalculatorTool, Config};
//!
//! #[tokio::main]
//! async fn main() -> tenx::Result<()> {
//!     let agent = Agent::from_config(&Config::load())?
//!         .tool(Arc::new(CalculatorTool))
//!         .build()?;
//!
//!     let response = agent.run("What is 15 * 23?").await?;
//!     println!("{} ({} tokens)", response.text(), response.usage().total_tokens);
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod core;
pub mod llm;
pub mod output;
pub mod tools;

// Re-export commonly used items
pub use crate::agent::{Agent, AgentOutput, AgentResponse, AgentTool, RunRequest, SessionHistory};
pub use crate::core::{Config, Message, Metadata, Result, TenxError, TokenUsage, ToolError};
pub use crate::llm::{LanguageModel, ManualToolModel, NativeToolModel};
pub use crate::output::OutputSchema;
pub use crate::tools::{CalculatorTool, Tool, ToolOutput, ToolRegistry};
