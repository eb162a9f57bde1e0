use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use opsrag_core::config::LlmSettings;
use opsrag_core::traits::CompletionService;
use opsrag_core::{Error, Result};

use crate::http_client;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You answer questions using only the context provided by the user.";

/// Chat completions against an OpenAI-compatible API. The key is read on each call.
pub struct OpenAiCompletion {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
    name: String,
}

impl OpenAiCompletion {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let base = settings.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
        Ok(Self {
            client: http_client(settings.timeout_secs)?,
            endpoint: format!("{base}/chat/completions"),
            model: settings.model.clone(),
            temperature: settings.temperature,
            api_key: settings.api_key.clone(),
            name: format!("openai:{}", settings.model),
        })
    }

    fn api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::ProviderUnavailable("missing OpenAI API key (set llm.api_key or OPENAI_API_KEY)".into()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    fn name(&self) -> &str { &self.name }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let api_key = self.api_key()?;
        debug!(endpoint = %self.endpoint, model = %self.model, prompt_chars = prompt.chars().count(), "openai chat completion");
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key.trim())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("OpenAI at {} unreachable: {e}", self.endpoint)))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::Completion(format!("OpenAI returned {status}: {text}")));
        }
        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| Error::Completion(format!("failed to parse OpenAI response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::Completion("OpenAI response contained no choices".into()))
    }
}
