//! Configuration management for tenx
//!
//! Supports environment variables, config files, and runtime overrides.
//!
//! Config file location: ~/.config/tenx/config.toml

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{Result, TenxError};

/// Main configuration for tenx
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Agent loop configuration
    #[serde(default)]
    pub agent: AgentConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the chat completions API
    pub base_url: String,
    /// Model identifier sent with every request
    pub model: String,
    /// API key; read from the environment, never written to disk
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// How the model is coached into calling tools
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallingMode {
    /// The provider accepts tool schemas and returns structured calls
    #[default]
    Native,
    /// Tools are described in the prompt and calls parsed from text
    Manual,
}

impl std::str::FromStr for ToolCallingMode {
    type Err = TenxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "manual" => Ok(Self::Manual),
            other => Err(TenxError::config(format!(
                "unknown tool calling mode '{other}' (expected native or manual)"
            ))),
        }
    }
}

/// Agent behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent name used in logs
    pub name: String,
    /// Maximum model rounds per run
    /// Default: 10
    pub max_llm_calls: usize,
    /// Maximum tokens the model may generate per round
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Caller instructions placed at the top of the system message
    pub system_prompt: Option<String>,
    /// Native or prompted tool calling
    pub tool_calling: ToolCallingMode,
    /// How many times a malformed model response is re-asked before failing
    /// Default: 0
    pub malformed_response_retries: usize,
    /// Per-tool timeout; none means tools bound themselves
    pub tool_timeout_secs: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: env::var("TENX_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            timeout_secs: 120,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "tenx".to_string(),
            max_llm_calls: env::var("TENX_MAX_LLM_CALLS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            max_tokens: Some(4000),
            temperature: None,
            system_prompt: None,
            tool_calling: env::var("TENX_TOOL_CALLING")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            malformed_response_retries: 0,
            tool_timeout_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: env::var("TENX_LOG").unwrap_or_else(|_| "info".to_string()),
            json: false,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tenx")
    }

    /// Get the config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from file, environment, and defaults
    /// Priority: CLI args > config file > env vars > defaults
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();

        match Self::load_from_path(&Self::config_file()) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(error = %e, "using default configuration");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific file
    ///
    /// The API key is always taken from the environment.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TenxError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| TenxError::config(format!("Failed to read config: {}", e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| TenxError::config(format!("Failed to parse config: {}", e)))?;

        if config.provider.api_key.is_none() {
            config.provider.api_key = ProviderConfig::default().api_key;
        }
        config.validate()?;

        Ok(config)
    }

    /// Reject settings the agent loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_llm_calls == 0 {
            return Err(TenxError::config("agent.max_llm_calls must be at least 1"));
        }
        if self.provider.base_url.trim().is_empty() {
            return Err(TenxError::config("provider.base_url must not be empty"));
        }
        Ok(())
    }

    /// Generate a default config file content for display
    pub fn default_config_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| String::from("# Error generating config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.agent.max_llm_calls >= 1);
        assert_eq!(config.agent.malformed_response_retries, 0);
        assert_eq!(config.agent.max_tokens, Some(4000));
        assert_eq!(config.provider.timeout_secs, 120);
    }

    #[test]
    fn test_config_serialization_omits_api_key() {
        let mut config = Config::default();
        config.provider.api_key = Some("sk-secret".to_string());
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("max_llm_calls"));
        assert!(!toml_str.contains("sk-secret"));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[provider]
base_url = "http://localhost:11434/v1"
model = "qwen3:8b"
timeout_secs = 30

[agent]
name = "math"
max_llm_calls = 4
tool_calling = "manual"
malformed_response_retries = 1
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.provider.model, "qwen3:8b");
        assert_eq!(config.agent.max_llm_calls, 4);
        assert_eq!(config.agent.tool_calling, ToolCallingMode::Manual);
        assert_eq!(config.agent.malformed_response_retries, 1);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_zero_budget_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[agent]\nname = \"x\"\nmax_llm_calls = 0\nmax_tokens = 10"
        )
        .unwrap();
        assert!(matches!(
            Config::load_from_path(file.path()),
            Err(TenxError::Config(_))
        ));
    }

    #[test]
    fn test_tool_calling_mode_parse() {
        assert_eq!(
            "Manual".parse::<ToolCallingMode>().unwrap(),
            ToolCallingMode::Manual
        );
        assert!("magic".parse::<ToolCallingMode>().is_err());
    }

    #[test]
    fn test_config_dir() {
        let dir = Config::config_dir();
        assert!(dir.to_string_lossy().contains("tenx"));
    }
}
