//! Local embedding provider using the crate `opsrag-embed`.
//!
//! Respects `embedding.local.use_fake` / `APP_USE_FAKE_EMBEDDINGS=1` to switch
//! to the FakeEmbedder for fast and deterministic outputs in tests and development.
use async_trait::async_trait;

use opsrag_core::config::LocalEmbeddingSettings;
use opsrag_core::traits::Embedder;
use opsrag_core::types::EmbeddingMode;
use opsrag_core::{Error, Result};
use opsrag_embed::{load_local_encoder, TextEncoder};

use super::{check_shape, provider_id};

pub struct LocalProvider {
    inner: Box<dyn TextEncoder>,
    id: String,
}

impl LocalProvider {
    /// Loads the encoder eagerly; missing model files are reported here.
    pub fn new(settings: &LocalEmbeddingSettings) -> Result<Self> {
        let inner = load_local_encoder(settings).map_err(|e| Error::ProviderUnavailable(format!("local embedding model: {e:#}")))?;
        Ok(Self::from_encoder(inner))
    }

    pub fn from_encoder(inner: Box<dyn TextEncoder>) -> Self {
        let id = provider_id(EmbeddingMode::Local, inner.model_name(), inner.dim());
        Self { inner, id }
    }
}

#[async_trait]
impl Embedder for LocalProvider {
    fn id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.inner.dim() }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.inner.encode_batch(texts).map_err(|e| Error::ProviderUnavailable(format!("{}: {e:#}", self.id)))?;
        check_shape(&self.id, texts.len(), self.inner.dim(), &vectors)?;
        Ok(vectors)
    }
}
