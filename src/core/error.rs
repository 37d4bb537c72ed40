//! Custom error types for tenx
//!
//! Provides a unified error handling system across all modules. Tool failures
//! have their own type because they never escape the tool executor.

use thiserror::Error;

use crate::core::metadata::TokenUsage;

/// Maximum number of characters of model output kept in error context
const EXCERPT_CHARS: usize = 240;

/// Main error type for tenx operations
#[derive(Error, Debug)]
pub enum TenxError {
    /// The model provider rejected or failed the request
    #[error("Provider error: {0}")]
    Provider(String),

    /// Neither a final answer nor a tool call could be recovered
    #[error("Malformed model response (llm call {iteration}): {excerpt}")]
    MalformedResponse {
        iteration: usize,
        excerpt: String,
        usage: TokenUsage,
    },

    /// The loop reached `max_llm_calls` without a final answer
    #[error("LLM call budget of {max_llm_calls} exceeded; last response: {last_response}")]
    BudgetExceeded {
        max_llm_calls: usize,
        last_response: String,
        usage: TokenUsage,
    },

    /// The final answer did not match the configured output schema
    #[error("Output format violation (llm call {iteration}): {detail}; response: {excerpt}")]
    FormatViolation {
        iteration: usize,
        detail: String,
        excerpt: String,
        usage: TokenUsage,
    },

    /// A message broke a conversation invariant before reaching history
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A nested agent could not be driven to completion
    #[error("Nested agent error: {0}")]
    NestedAgent(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for other cases
    #[error("{0}")]
    Other(String),
}

/// Convenience Result type for tenx operations
pub type Result<T> = std::result::Result<T, TenxError>;

impl TenxError {
    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid message error
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    /// Create a malformed response error, truncating the raw output
    pub fn malformed(iteration: usize, raw: &str) -> Self {
        Self::MalformedResponse {
            iteration,
            excerpt: excerpt(raw),
            usage: TokenUsage::default(),
        }
    }

    /// Tokens spent before an orchestration failure
    ///
    /// Loop failures carry the run's counters so callers, including a parent
    /// agent, can still account for them. Other errors carry none.
    pub fn usage(&self) -> Option<TokenUsage> {
        match self {
            Self::MalformedResponse { usage, .. }
            | Self::BudgetExceeded { usage, .. }
            | Self::FormatViolation { usage, .. } => Some(*usage),
            _ => None,
        }
    }

    /// Set the spent-token counters of an orchestration failure
    pub fn with_usage(mut self, spent: TokenUsage) -> Self {
        if let Self::MalformedResponse { usage, .. }
        | Self::BudgetExceeded { usage, .. }
        | Self::FormatViolation { usage, .. } = &mut self
        {
            *usage = spent;
        }
        self
    }

    /// Whether this error was raised by the orchestration loop itself rather
    /// than by the transport or configuration layers
    pub fn is_orchestration_failure(&self) -> bool {
        matches!(
            self,
            Self::MalformedResponse { .. }
                | Self::BudgetExceeded { .. }
                | Self::FormatViolation { .. }
                | Self::InvalidMessage(_)
        )
    }
}

/// Error raised by a single tool invocation
///
/// The executor converts every variant into tool-role error content, so these
/// never abort a run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// No tool registered under this name
    #[error("Unknown tool '{0}'")]
    NotFound(String),

    /// Arguments did not satisfy the tool's parameter schema
    #[error("Invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The tool ran and failed
    #[error("Tool '{tool}' failed: {cause}")]
    Execution {
        tool: String,
        cause: String,
        /// Tokens the tool spent before failing
        usage: Option<TokenUsage>,
    },

    /// The tool did not finish within the executor timeout
    #[error("Tool '{tool}' timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },
}

impl ToolError {
    /// Create an execution error
    pub fn execution(tool: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Execution {
            tool: tool.into(),
            cause: cause.to_string(),
            usage: None,
        }
    }

    /// Record tokens spent by a failed execution
    pub fn with_usage(mut self, spent: TokenUsage) -> Self {
        if let Self::Execution { usage, .. } = &mut self {
            *usage = Some(spent);
        }
        self
    }

    /// Tokens spent by the failed call, if it reported any
    pub fn usage(&self) -> Option<TokenUsage> {
        match self {
            Self::Execution { usage, .. } => *usage,
            _ => None,
        }
    }

    /// Create an invalid arguments error
    pub fn invalid_arguments(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Name of the tool this error belongs to
    pub fn tool_name(&self) -> &str {
        match self {
            Self::NotFound(tool) => tool,
            Self::InvalidArguments { tool, .. }
            | Self::Execution { tool, .. }
            | Self::Timeout { tool, .. } => tool,
        }
    }
}

/// Shorten model output for inclusion in error messages
pub fn excerpt(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() > EXCERPT_CHARS {
        format!("{}...", trimmed.chars().take(EXCERPT_CHARS).collect::<String>())
    } else {
        trimmed.to_string()
    }
}
