//! Per-provider LLM adapters.

mod anthropic;
mod openai;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

use std::sync::Arc;

use super::{LlmClient, LlmSettings, Provider};

/// Build the adapter for the given settings' provider.
pub fn create_client(settings: LlmSettings) -> Arc<dyn LlmClient> {
    match settings.provider {
        Provider::Anthropic => Arc::new(AnthropicClient::new(settings)),
        Provider::OpenAi | Provider::Groq | Provider::Xai | Provider::Custom => {
            Arc::new(OpenAiClient::new(settings))
        }
    }
}
