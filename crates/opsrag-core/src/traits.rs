use async_trait::async_trait;

use crate::error::Result;

/// Turns text into fixed-dimension vectors.
///
/// Every vector returned by one instance has length `dim()`, and a query
/// embedding is comparable (cosine) with document embeddings of the same instance.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `ollama:nomic-embed-text:latest:d768`).
    fn id(&self) -> &str;
    fn dim(&self) -> usize;
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_documents(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| crate::Error::ProviderUnavailable(format!("{} returned no embedding for query", self.id())))
    }
}

/// Opaque text-completion backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String>;
}
