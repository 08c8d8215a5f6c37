//! LLM client seam: one async trait, concrete provider clients behind it.
//!
//! Screening and extraction both talk to models through [`LlmClient`], so
//! tests can substitute spies and the orchestrator never knows which
//! provider is on the other end.

pub mod providers;
pub mod retry;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::Provider;

pub use providers::{AnthropicClient, OpenAiClient};
pub use retry::{complete_with_retry, RetryExhausted, RetryPolicy};

// ── Error taxonomy ───────────────────────────────────────────────

/// Failure modes of a model invocation.
///
/// Transport-level failures are retryable; provider rejections are not,
/// except for rate limiting and server-side errors. Content-level failures
/// (output that cannot be parsed into a verdict) are a screening concern and
/// live in [`crate::screening::verdict`].
#[derive(Debug, Error)]
pub enum LlmError {
    /// Network-level failure (DNS, TLS, timeout, connection reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider rejected the request.
    #[error("{provider} API error {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    /// Response arrived but carried no text content.
    #[error("{0} returned an empty completion")]
    EmptyCompletion(&'static str),
}

impl LlmError {
    /// Whether a retry with backoff could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::EmptyCompletion(_) => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

// ── Client trait ─────────────────────────────────────────────────

/// A provider-agnostic completion client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider label for logging.
    fn provider_name(&self) -> &'static str;

    /// Send a single-turn prompt and return the model's text response.
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError>;
}

/// Build a client for the given provider.
///
/// API keys come from the tool configuration (environment-backed); a missing
/// key is a configuration fault reported before any request is sent.
pub fn create_client(provider: Provider, api_key: &str) -> anyhow::Result<std::sync::Arc<dyn LlmClient>> {
    if api_key.is_empty() {
        anyhow::bail!(
            "No API key configured for provider '{}'",
            provider.as_str()
        );
    }
    Ok(match provider {
        Provider::Anthropic => std::sync::Arc::new(AnthropicClient::new(api_key.to_string())),
        Provider::Openai => std::sync::Arc::new(OpenAiClient::openai(api_key.to_string())),
        Provider::Openrouter => std::sync::Arc::new(OpenAiClient::openrouter(api_key.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(LlmError::Transport("connection reset".into()).is_retryable());
    }

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        for status in [429u16, 500, 503] {
            let e = LlmError::Api {
                provider: "anthropic",
                status,
                message: String::new(),
            };
            assert!(e.is_retryable(), "status {status} should be retryable");
        }
    }

    #[test]
    fn client_errors_are_not_retryable() {
        for status in [400u16, 401, 404] {
            let e = LlmError::Api {
                provider: "openai",
                status,
                message: String::new(),
            };
            assert!(!e.is_retryable(), "status {status} should not be retryable");
        }
        assert!(!LlmError::EmptyCompletion("anthropic").is_retryable());
    }

    #[test]
    fn create_client_rejects_empty_key() {
        assert!(create_client(Provider::Anthropic, "").is_err());
    }
}
