//! Text-completion backends behind [`CompletionService`].
//!
//! A backend that cannot be reached or is misconfigured (no client, no key,
//! connection failure) is `Error::ProviderUnavailable`. A reachable backend that
//! fails to generate (non-2xx status, unparsable or empty body) is `Error::Completion`.

use async_trait::async_trait;

use opsrag_core::config::{LlmProviderKind, LlmSettings};
use opsrag_core::traits::CompletionService;
use opsrag_core::Result;

pub mod ollama;
pub mod openai;

pub use ollama::OllamaCompletion;
pub use openai::OpenAiCompletion;

pub enum CompletionProvider {
    Ollama(OllamaCompletion),
    OpenAi(OpenAiCompletion),
}

impl CompletionProvider {
    /// Builds the HTTP client only; nothing is contacted until the first completion.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        Ok(match settings.provider {
            LlmProviderKind::Ollama => CompletionProvider::Ollama(OllamaCompletion::new(settings)?),
            LlmProviderKind::OpenAi => CompletionProvider::OpenAi(OpenAiCompletion::new(settings)?),
        })
    }

    fn inner(&self) -> &dyn CompletionService {
        match self {
            CompletionProvider::Ollama(p) => p,
            CompletionProvider::OpenAi(p) => p,
        }
    }
}

#[async_trait]
impl CompletionService for CompletionProvider {
    fn name(&self) -> &str { self.inner().name() }
    async fn complete(&self, prompt: &str) -> Result<String> { self.inner().complete(prompt).await }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| opsrag_core::Error::ProviderUnavailable(format!("failed to build completion HTTP client: {e}")))
}
