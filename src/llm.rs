//! LLM inference client.
//!
//! [`LanguageModel`] is the prompt → text boundary the query pipeline calls.
//! [`OllamaClient`] implements it against Ollama's generate endpoint with a
//! single non-streaming request per prompt.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use commit_harness_core::InferenceError;

use crate::config::LlmConfig;

/// Returned when the endpoint answers without a `response` field.
pub const NO_RESPONSE: &str = "[No response]";

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, InferenceError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// Client for `POST {ollama_url}` (usually `.../api/generate`).
///
/// No retries: a failed request fails the question it was asked for.
pub struct OllamaClient {
    url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            url: config.ollama_url.clone(),
            client,
        })
    }
}

/// Pull the answer text out of a generate response body.
fn extract_response(json: &serde_json::Value) -> String {
    json.get("response")
        .and_then(|r| r.as_str())
        .unwrap_or(NO_RESPONSE)
        .to_string()
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, InferenceError> {
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Transport {
                url: self.url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;

        tracing::debug!(
            model,
            prompt_chars = prompt.len(),
            "LLM response received"
        );
        Ok(extract_response(&json))
    }
}
