use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use opsrag_core::config::OllamaEmbeddingSettings;
use opsrag_core::traits::Embedder;
use opsrag_core::types::EmbeddingMode;
use opsrag_core::{Error, Result};

use super::{check_shape, provider_id};

/// Embeddings from a self-hosted Ollama server (`POST /api/embed`).
pub struct OllamaProvider {
    client: Client,
    endpoint: String,
    model: String,
    dim: usize,
    id: String,
}

impl OllamaProvider {
    pub fn new(settings: &OllamaEmbeddingSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::ProviderUnavailable(format!("failed to build Ollama HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/embed", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            dim: settings.dim,
            id: provider_id(EmbeddingMode::Ollama, &settings.model, settings.dim),
        })
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for OllamaProvider {
    fn id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(endpoint = %self.endpoint, inputs = texts.len(), "ollama embed request");
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { model: &self.model, input: texts })
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("Ollama at {} unreachable: {e}", self.endpoint)))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::ProviderUnavailable(format!("Ollama returned {status}: {body}")));
        }
        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("failed to parse Ollama embed response: {e}")))?;
        check_shape(&self.id, texts.len(), self.dim, &parsed.embeddings)?;
        Ok(parsed.embeddings)
    }
}
