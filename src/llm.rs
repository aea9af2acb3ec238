//! Chat-completion client.
//!
//! The pipeline talks to the model through the [`LlmClient`] trait so tests
//! can substitute a scripted double. [`OpenAiCompatClient`] speaks the
//! OpenAI `/chat/completions` protocol, which Ollama, vLLM, DeepSeek and
//! most hosted gateways also serve.
//!
//! Calls are not retried: a failed call fails the stage attempt and the
//! user re-runs it. Every request carries the configured timeout.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model_name(&self) -> &str;

    /// Send `messages` and return the assistant's reply text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

pub struct OpenAiCompatClient {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<String> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid completion response: missing choices[0].message.content"))?;
    if content.trim().is_empty() {
        bail!("Model returned an empty reply");
    }
    Ok(content.to_string())
}

fn describe_http_error(status: reqwest::StatusCode, body: &str) -> String {
    match status.as_u16() {
        401 | 403 => format!("LLM endpoint rejected the credentials ({})", status),
        404 => format!("LLM endpoint or model not found ({}): {}", status, body),
        429 => format!("LLM endpoint is rate limiting requests: {}", body),
        _ => format!("LLM API error {}: {}", status, body),
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        debug!(model = %self.model, messages = messages.len(), "chat completion request");

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("LLM request timed out: {}", e)
                } else {
                    anyhow!("LLM connection error ({}): {}", self.endpoint, e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!(describe_http_error(status, &text));
        }
        let json: serde_json::Value = response
            .json()
            .await
            .context("Failed to decode completion response")?;
        parse_completion(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let json = serde_json::to_value(ChatMessage::system("be precise")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "system", "content": "be precise"}));
    }

    #[test]
    fn test_parse_completion() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "## Summary\nlogin"}}]
        });
        assert_eq!(parse_completion(&json).unwrap(), "## Summary\nlogin");
    }

    #[test]
    fn test_empty_completion_is_error() {
        let json = serde_json::json!({"choices": [{"message": {"content": "  "}}]});
        assert!(parse_completion(&json).is_err());
        assert!(parse_completion(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_endpoint_built_from_base_url() {
        let config = LlmConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            api_key_env: "CASEGEN_TEST_UNSET_KEY".to_string(),
            ..LlmConfig::default()
        };
        let client = OpenAiCompatClient::new(&config).unwrap();
        assert_eq!(client.endpoint, "http://localhost:11434/v1/chat/completions");
        assert!(client.api_key.is_none());
    }
}
