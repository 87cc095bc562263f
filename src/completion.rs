//! Chat completion providers for answer generation.
//!
//! The question-answering path is useful without any LLM configured: search
//! and context assembly still work, and the disabled provider reports
//! clearly that generation is unavailable.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::CompletionConfig;
use crate::error::EngineError;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String, EngineError>;
}

/// Build the configured completion provider.
pub fn create_completion_provider(config: &CompletionConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set for openai provider"))?;
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string());
            Ok(Arc::new(OpenAiCompletion::new(
                api_key,
                model,
                config.temperature,
                config.max_retries,
                config.timeout_secs,
            )?))
        }
        other => bail!("unknown completion provider: {}", other),
    }
}

/// Placeholder provider used when no LLM is configured.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String, EngineError> {
        Err(EngineError::CompletionUnavailable(
            "no completion provider configured".to_string(),
        ))
    }
}

/// OpenAI chat completions client with the same retry discipline as the
/// embedding provider.
pub struct OpenAiCompletion {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f64,
    max_retries: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl OpenAiCompletion {
    pub fn new(
        api_key: String,
        model: String,
        temperature: f64,
        max_retries: u32,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model,
            temperature,
            max_retries,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletion {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, EngineError> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self
                .client
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let retriable_message = match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: ChatResponse = resp.json().await.map_err(|e| {
                            EngineError::CompletionUnavailable(format!(
                                "malformed completion response: {}",
                                e
                            ))
                        })?;
                        return parsed
                            .choices
                            .into_iter()
                            .next()
                            .map(|c| c.message.content)
                            .ok_or_else(|| {
                                EngineError::CompletionUnavailable(
                                    "completion response had no choices".to_string(),
                                )
                            });
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        format!("completions API returned {}", status)
                    } else {
                        let detail = resp.text().await.unwrap_or_default();
                        return Err(EngineError::CompletionUnavailable(format!(
                            "completions API returned {}: {}",
                            status, detail
                        )));
                    }
                }
                Err(e) => format!("completion request failed: {}", e),
            };

            if attempt > self.max_retries {
                return Err(EngineError::CompletionUnavailable(format!(
                    "{} (after {} attempts)",
                    retriable_message, attempt
                )));
            }
            let backoff = 1u64 << (attempt - 1).min(5);
            tracing::warn!(
                attempt,
                backoff_secs = backoff,
                "{}; retrying",
                retriable_message
            );
            tokio::time::sleep(Duration::from_secs(backoff)).await;
        }
    }
}
