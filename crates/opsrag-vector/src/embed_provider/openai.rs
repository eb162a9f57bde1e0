use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use opsrag_core::config::OpenAiEmbeddingSettings;
use opsrag_core::traits::Embedder;
use opsrag_core::types::EmbeddingMode;
use opsrag_core::{Error, Result};

use super::{check_shape, provider_id};

/// Embeddings from an OpenAI-compatible `/embeddings` endpoint.
///
/// The API key is resolved per request (`api_key` setting, then `OPENAI_API_KEY`),
/// so construction never fails for missing credentials.
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    model: String,
    dim: usize,
    api_key: Option<String>,
    id: String,
}

impl OpenAiProvider {
    pub fn new(settings: &OpenAiEmbeddingSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::ProviderUnavailable(format!("failed to build OpenAI HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            dim: settings.dim,
            api_key: settings.api_key.clone(),
            id: provider_id(EmbeddingMode::OpenAi, &settings.model, settings.dim),
        })
    }

    fn api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::ProviderUnavailable("missing OpenAI API key (set embedding.openai.api_key or OPENAI_API_KEY)".into()))
    }

    /// `dimensions` is only understood by the text-embedding-3 family.
    fn requested_dimensions(&self) -> Option<usize> {
        self.model.starts_with("text-embedding-3").then_some(self.dim)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiProvider {
    fn id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = self.api_key()?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(endpoint = %self.endpoint, inputs = texts.len(), "openai embed request");
        let request = EmbeddingRequest { model: &self.model, input: texts, dimensions: self.requested_dimensions() };
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key.trim())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("OpenAI at {} unreachable: {e}", self.endpoint)))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::ProviderUnavailable(format!("OpenAI embeddings request failed ({status}): {body}")));
        }
        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("failed to parse OpenAI embedding response: {e}")))?;
        parsed.data.sort_by_key(|entry| entry.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|entry| entry.embedding).collect();
        check_shape(&self.id, texts.len(), self.dim, &vectors)?;
        Ok(vectors)
    }
}
