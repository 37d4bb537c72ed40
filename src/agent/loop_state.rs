//! Agent loop state management
//!
//! Tracks where a run is in the model/tool cycle and enforces the LLM call
//! budget.

use crate::core::error::excerpt;
use crate::core::{Result, TenxError, TokenUsage};

/// Phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// Waiting on the model
    AwaitingModel,
    /// Waiting on the tool calls of the last turn
    AwaitingTools,
    /// A final answer was accepted
    Done,
    /// The run ended with an error
    Failed,
}

/// State of the agent loop
#[derive(Debug, Clone)]
pub struct AgentLoopState {
    /// Model rounds started so far
    pub llm_calls: usize,
    /// Maximum allowed model rounds
    pub max_llm_calls: usize,
    /// Current phase
    pub phase: LoopPhase,
    /// Tool turns completed
    pub tool_turns: usize,
    retries_left: usize,
    last_response: String,
}

impl AgentLoopState {
    /// Create a new loop state
    pub fn new(max_llm_calls: usize, malformed_retries: usize) -> Self {
        Self {
            llm_calls: 0,
            max_llm_calls,
            phase: LoopPhase::AwaitingModel,
            tool_turns: 0,
            retries_left: malformed_retries,
            last_response: String::new(),
        }
    }

    /// Start a model round, returning its 1-based number
    ///
    /// Fails with [`TenxError::BudgetExceeded`] once `max_llm_calls` rounds
    /// have been started. The error's counters are left for the caller to fill.
    pub fn enter_model(&mut self) -> Result<usize> {
        if self.llm_calls >= self.max_llm_calls {
            self.phase = LoopPhase::Failed;
            return Err(TenxError::BudgetExceeded {
                max_llm_calls: self.max_llm_calls,
                last_response: excerpt(&self.last_response),
                usage: TokenUsage::default(),
            });
        }
        self.llm_calls += 1;
        self.phase = LoopPhase::AwaitingModel;
        Ok(self.llm_calls)
    }

    /// Remember the latest raw model output
    pub fn record_response(&mut self, raw: &str) {
        self.last_response = raw.to_string();
    }

    pub fn last_response(&self) -> &str {
        &self.last_response
    }

    /// Move to tool execution
    pub fn enter_tools(&mut self) {
        self.phase = LoopPhase::AwaitingTools;
        self.tool_turns += 1;
    }

    /// Consume one malformed-response retry if any remain
    pub fn take_retry(&mut self) -> bool {
        if self.retries_left == 0 {
            return false;
        }
        self.retries_left -= 1;
        true
    }

    pub fn finish(&mut self) {
        self.phase = LoopPhase::Done;
    }

    pub fn fail(&mut self) {
        self.phase = LoopPhase::Failed;
    }
}
