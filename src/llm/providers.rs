//! Concrete [`LlmClient`] implementations.
//!
//! Each client wraps one provider's HTTP API and normalizes its response
//! shape into plain text. OpenRouter speaks the OpenAI chat-completions
//! dialect, so it reuses [`OpenAiClient`] with a different base URL.

use std::time::Duration;

use async_trait::async_trait;

use super::{LlmClient, LlmError};

/// Per-request timeout. Full-text prompts can run long on large PDFs.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ── Anthropic ────────────────────────────────────────────────────

/// Client for the Anthropic messages API.
pub struct AnthropicClient {
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let payload = serde_json::json!({
            "model": model,
            "max_tokens": max_tokens,
            "temperature": 0.0,
            "messages": [{ "role": "user", "content": prompt }]
        });

        let resp = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider: "anthropic",
                status,
                message,
            });
        }

        let body: serde_json::Value = resp.json().await?;
        let text = body["content"][0]["text"].as_str().unwrap_or_default();
        if text.is_empty() {
            return Err(LlmError::EmptyCompletion("anthropic"));
        }
        Ok(text.to_string())
    }
}

// ── OpenAI / OpenRouter ──────────────────────────────────────────

/// Client for OpenAI-compatible chat-completions endpoints.
pub struct OpenAiClient {
    api_key: String,
    endpoint: String,
    provider: &'static str,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn openai(api_key: String) -> Self {
        Self {
            api_key,
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            provider: "openai",
            client: reqwest::Client::new(),
        }
    }

    pub fn openrouter(api_key: String) -> Self {
        Self {
            api_key,
            endpoint: "https://openrouter.ai/api/v1/chat/completions".into(),
            provider: "openrouter",
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn provider_name(&self) -> &'static str {
        self.provider
    }

    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let payload = serde_json::json!({
            "model": model,
            "max_tokens": max_tokens,
            "temperature": 0.0,
            "messages": [{ "role": "user", "content": prompt }]
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider: self.provider,
                status,
                message,
            });
        }

        let body: serde_json::Value = resp.json().await?;
        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default();
        if text.is_empty() {
            return Err(LlmError::EmptyCompletion(self.provider));
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openrouter_uses_openrouter_endpoint() {
        let c = OpenAiClient::openrouter("key".into());
        assert!(c.endpoint.contains("openrouter.ai"));
        assert_eq!(c.provider_name(), "openrouter");
    }

    #[test]
    fn openai_uses_openai_endpoint() {
        let c = OpenAiClient::openai("key".into());
        assert!(c.endpoint.contains("api.openai.com"));
        assert_eq!(c.provider_name(), "openai");
    }
}
