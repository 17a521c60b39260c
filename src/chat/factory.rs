use std::sync::Arc;

use super::{ChatClient, OllamaClient, OpenAiClient};
use crate::config::{LlmSettings, ProviderKind};
use crate::Result;

/// Builds the chat client described by the settings.
///
/// Called once at startup; the returned client is shared by every run.
#[derive(Debug)]
pub struct ChatClientFactory;

impl ChatClientFactory {
    /// The concrete provider for `settings`.
    ///
    /// `auto` talks to the OpenAI-compatible `base_url` for every model, so
    /// `OPENAI_BASE_URL` and `OPENAI_API_KEY` always apply. The native Ollama
    /// API has to be asked for explicitly.
    pub fn resolve_provider(settings: &LlmSettings) -> ProviderKind {
        match settings.provider {
            ProviderKind::Auto => ProviderKind::OpenAi,
            explicit => explicit,
        }
    }

    pub fn create(settings: &LlmSettings) -> Result<Arc<dyn ChatClient>> {
        let timeout = settings.timeout();
        let provider = Self::resolve_provider(settings);
        tracing::info!(provider = ?provider, model = %settings.model, "creating chat client");

        match provider {
            ProviderKind::Ollama => Ok(Arc::new(OllamaClient::new(
                &settings.ollama_base_url,
                timeout,
                settings.max_retries,
            )?)),
            ProviderKind::OpenAi | ProviderKind::Auto => Ok(Arc::new(OpenAiClient::new(
                &settings.base_url,
                &settings.api_key,
                timeout,
                settings.max_retries,
            )?)),
        }
    }
}
