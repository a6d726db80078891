pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use edith_core::types::{ChatMessage, LLMResponse};
use edith_core::{Config, Error, Result};
use serde_json::Value;

pub use openai::OpenAIProvider;

/// Abstraction over the chat-completion-with-tools endpoint so the agent loop
/// never depends on a concrete vendor.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse>;
}

/// Build the configured provider. Refuses to start without an API key so a
/// missing key surfaces before any browser work begins.
pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    if config.llm.api_key.trim().is_empty() {
        return Err(Error::Config(
            "No API key configured. Run `edith onboard` and set llm.apiKey.".to_string(),
        ));
    }
    Ok(Arc::new(OpenAIProvider::new(
        &config.llm.api_key,
        &config.llm.api_base,
        &config.llm.model,
        config.llm.max_tokens,
        config.llm.temperature,
    )))
}
