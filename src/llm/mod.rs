//! LLM module - Language Model integrations
//!
//! Provides the transport abstraction, an OpenAI-compatible client and the
//! two tool-calling styles the agent loop can drive.

pub mod manual;
pub mod mock;
pub mod native;
pub mod openai;
pub mod prompt;
pub mod traits;

use std::sync::Arc;

use crate::core::{Config, Result, ToolCallingMode};

pub use manual::ManualToolModel;
pub use mock::{ScriptedModel, ScriptedProvider};
pub use native::NativeToolModel;
pub use openai::OpenAiClient;
pub use traits::{
    GenerateOptions, LLMProvider, LLMResponse, LanguageModel, ModelReply, ModelResponse,
};

/// Build the configured model over the OpenAI-compatible client
pub fn model_from_config(config: &Config) -> Result<Arc<dyn LanguageModel>> {
    let provider: Arc<dyn LLMProvider> = Arc::new(OpenAiClient::from_config(&config.provider)?);
    let options = GenerateOptions {
        temperature: config.agent.temperature,
        max_tokens: config.agent.max_tokens,
        ..Default::default()
    };
    let model = config.provider.model.clone();

    Ok(match config.agent.tool_calling {
        ToolCallingMode::Native => {
            Arc::new(NativeToolModel::new(provider, model).with_options(options))
        }
        ToolCallingMode::Manual => {
            Arc::new(ManualToolModel::new(provider, model).with_options(options))
        }
    })
}
