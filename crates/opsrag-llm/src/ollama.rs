use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use opsrag_core::config::LlmSettings;
use opsrag_core::traits::CompletionService;
use opsrag_core::{Error, Result};

use crate::http_client;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Non-streaming `POST /api/generate` against an Ollama server.
pub struct OllamaCompletion {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    name: String,
}

impl OllamaCompletion {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let base = settings.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
        Ok(Self {
            client: http_client(settings.timeout_secs)?,
            endpoint: format!("{base}/api/generate"),
            model: settings.model.clone(),
            temperature: settings.temperature,
            name: format!("ollama:{}", settings.model),
        })
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl CompletionService for OllamaCompletion {
    fn name(&self) -> &str { &self.name }

    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(endpoint = %self.endpoint, model = %self.model, prompt_chars = prompt.chars().count(), "ollama generate");
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions { temperature: self.temperature },
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("Ollama at {} unreachable: {e}", self.endpoint)))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::Completion(format!("Ollama returned {status}: {text}")));
        }
        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| Error::Completion(format!("failed to parse Ollama response: {e}")))?;
        Ok(parsed.response)
    }
}
