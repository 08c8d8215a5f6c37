//! Bounded retry with backoff for transient provider failures.
//!
//! The policy is explicit configuration, not hard-coded control flow: the
//! orchestrator and extractor receive a [`RetryPolicy`] and wrap every model
//! invocation in [`complete_with_retry`]. Only retryable errors (transport,
//! rate limit, 5xx) are retried; content and auth failures surface at once.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{LlmClient, LlmError};

/// Bounded-attempt retry schedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each subsequent attempt.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based).
    fn delay(&self, retry: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << (retry - 1).min(6)))
    }
}

/// Terminal failure of a retried invocation, carrying the number of
/// attempts actually made.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RetryExhausted {
    pub error: LlmError,
    pub attempts: u32,
}

/// Invoke `client.complete` under the policy.
///
/// Both arms report the number of attempts actually made, so callers can
/// tally provider spend per citation whether or not the call succeeded.
pub async fn complete_with_retry(
    client: &dyn LlmClient,
    model: &str,
    prompt: &str,
    max_tokens: u32,
    policy: RetryPolicy,
) -> Result<(String, u32), RetryExhausted> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match client.complete(model, prompt, max_tokens).await {
            Ok(text) => return Ok((text, attempt)),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    provider = client.provider_name(),
                    model,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient provider error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(RetryExhausted {
                    error: e,
                    attempts: attempt,
                })
            }
        }
    }
}
