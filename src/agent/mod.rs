//! Agent module - orchestration and conversation management
//!
//! Contains the agent loop that coordinates model calls and tool execution,
//! the session history it reads and writes, and the adapter that lets one
//! agent serve as another agent's tool.

pub mod history;
pub mod loop_state;
pub mod orchestrator;
pub mod sub_agent;

pub use history::{SessionHistory, Transcript, DEFAULT_SESSION};
pub use loop_state::{AgentLoopState, LoopPhase};
pub use orchestrator::{Agent, AgentBuilder, AgentOutput, AgentResponse, RunRequest};
pub use sub_agent::{run_isolated, AgentTool};
