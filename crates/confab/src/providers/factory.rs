use std::sync::Arc;

use anyhow::Result;

use super::anthropic::AnthropicProvider;
use super::base::Provider;
use super::configs::ProviderConfig;
use super::ollama::OllamaProvider;
use super::openai::OpenAiProvider;
use super::openrouter::OpenRouterProvider;

/// Build the adapter selected by the configuration. The system prompt is
/// baked into the instance; the title generator is simply a second instance
/// built with the title prompt.
pub fn build_provider(config: ProviderConfig, system_prompt: &str) -> Result<Arc<dyn Provider>> {
    match config {
        ProviderConfig::Ollama(config) => Ok(Arc::new(OllamaProvider::new(config, system_prompt)?)),
        ProviderConfig::Anthropic(config) => {
            Ok(Arc::new(AnthropicProvider::new(config, system_prompt)?))
        }
        ProviderConfig::OpenAi(config) => Ok(Arc::new(OpenAiProvider::new(config, system_prompt)?)),
        ProviderConfig::OpenRouter(config) => {
            Ok(Arc::new(OpenRouterProvider::new(config, system_prompt)?))
        }
    }
}
