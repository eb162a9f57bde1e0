//! Embedding providers, dispatched by [`EmbeddingMode`].
//!
//! Implementations may call a local model (see `local.rs`), a self-hosted
//! Ollama server (`ollama.rs`) or an OpenAI-compatible API (`openai.rs`).
//! Providers must return vectors of the same dimensionality for a given id.
//! Remote providers are built without touching the network; a missing key or
//! an unreachable endpoint surfaces as `ProviderUnavailable` on first use.
use async_trait::async_trait;

use opsrag_core::config::EmbeddingSettings;
use opsrag_core::traits::Embedder;
use opsrag_core::types::EmbeddingMode;
use opsrag_core::{Error, Result};

pub mod local;
pub mod ollama;
pub mod openai;

pub use local::LocalProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

pub enum EmbeddingProvider {
    Local(LocalProvider),
    Ollama(OllamaProvider),
    OpenAi(OpenAiProvider),
}

impl EmbeddingProvider {
    pub fn from_settings(mode: EmbeddingMode, settings: &EmbeddingSettings) -> Result<Self> {
        Ok(match mode {
            EmbeddingMode::Local => EmbeddingProvider::Local(LocalProvider::new(&settings.local)?),
            EmbeddingMode::Ollama => EmbeddingProvider::Ollama(OllamaProvider::new(&settings.ollama)?),
            EmbeddingMode::OpenAi => EmbeddingProvider::OpenAi(OpenAiProvider::new(&settings.openai)?),
        })
    }

    pub fn mode(&self) -> EmbeddingMode {
        match self {
            EmbeddingProvider::Local(_) => EmbeddingMode::Local,
            EmbeddingProvider::Ollama(_) => EmbeddingMode::Ollama,
            EmbeddingProvider::OpenAi(_) => EmbeddingMode::OpenAi,
        }
    }

    fn inner(&self) -> &dyn Embedder {
        match self {
            EmbeddingProvider::Local(p) => p,
            EmbeddingProvider::Ollama(p) => p,
            EmbeddingProvider::OpenAi(p) => p,
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingProvider {
    fn id(&self) -> &str { self.inner().id() }
    fn dim(&self) -> usize { self.inner().dim() }
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { self.inner().embed_documents(texts).await }
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> { self.inner().embed_query(text).await }
}

pub(crate) fn provider_id(mode: EmbeddingMode, model: &str, dim: usize) -> String {
    format!("{}:{}:d{}", mode.as_str(), model, dim)
}

/// Reject responses that do not match the request: one vector per input, each of `dim` entries.
pub(crate) fn check_shape(id: &str, expected: usize, dim: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != expected {
        return Err(Error::ProviderUnavailable(format!("{id} returned {} embeddings for {expected} inputs", vectors.len())));
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dim) {
        return Err(Error::ProviderUnavailable(format!("{id} returned {} dims, configured for {dim}", v.len())));
    }
    Ok(())
}
