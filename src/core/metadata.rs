//! Run metadata and token accounting
//!
//! [`Metadata`] is passed by parameter through every call boundary. It carries
//! the reserved usage counters as a typed sub-structure and caller data in an
//! open extension map. Both serialize into one flat JSON object.

use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved counter keys
pub const PROMPT_TOKENS: &str = "prompt_tokens";
pub const COMPLETION_TOKENS: &str = "completion_tokens";
pub const TOTAL_TOKENS: &str = "total_tokens";

/// Token usage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Usage for one call; the total is derived
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Sum another set of counters into this one
    pub fn merge(&mut self, other: &TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }

    /// Whether no tokens were counted
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Value of a reserved counter by key
    pub fn get(&self, key: &str) -> Option<u64> {
        match key {
            PROMPT_TOKENS => Some(self.prompt_tokens),
            COMPLETION_TOKENS => Some(self.completion_tokens),
            TOTAL_TOKENS => Some(self.total_tokens),
            _ => None,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.merge(&rhs);
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(mut self, rhs: Self) -> Self::Output {
        self.merge(&rhs);
        self
    }
}

/// Caller context plus accumulated usage for one agent run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Reserved counters, mutated only by the controller
    #[serde(flatten)]
    pub usage: TokenUsage,
    /// Caller-supplied keys
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Metadata {
    /// Create empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Build metadata from a caller map, lifting numeric reserved keys into
    /// the typed counters
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        let mut usage = TokenUsage::default();
        for (key, slot) in [
            (PROMPT_TOKENS, &mut usage.prompt_tokens),
            (COMPLETION_TOKENS, &mut usage.completion_tokens),
            (TOTAL_TOKENS, &mut usage.total_tokens),
        ] {
            if let Some(n) = map.get(key).and_then(Value::as_u64) {
                *slot = n;
                map.remove(key);
            }
        }
        Self { usage, extra: map }
    }

    /// Set a caller key; reserved counter keys are ignored
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a caller key; reserved counter keys are ignored
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if self.usage.get(&key).is_none() {
            self.extra.insert(key, value.into());
        }
    }

    /// Look up a caller key or a reserved counter
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.usage.get(key) {
            Some(n) => Some(Value::from(n)),
            None => self.extra.get(key).cloned(),
        }
    }

    /// Look up a caller key as a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    /// Accumulate the usage of one model round
    pub fn record_usage(&mut self, usage: &TokenUsage) {
        self.usage.merge(usage);
    }

    /// Sum counters propagated up from a nested agent
    pub fn merge_usage(&mut self, nested: &TokenUsage) {
        self.usage.merge(nested);
    }

    /// Metadata handed to a nested agent: same caller keys, counters at zero
    pub fn for_nested_call(&self) -> Self {
        Self {
            usage: TokenUsage::default(),
            extra: self.extra.clone(),
        }
    }

    /// Flatten into a single JSON object
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.extra.clone();
        map.insert(PROMPT_TOKENS.into(), self.usage.prompt_tokens.into());
        map.insert(COMPLETION_TOKENS.into(), self.usage.completion_tokens.into());
        map.insert(TOTAL_TOKENS.into(), self.usage.total_tokens.into());
        map
    }
}
